//! Chirp authorization and accounting core: the rights bitmask and its text
//! codec, per-directory ACLs, the path sanitizer, the allocation tracker,
//! group lookup, and the ticket registry.

pub mod acl;
pub mod alloc;
pub mod group;
pub mod path;
pub mod rights;
pub mod ticket;

pub use acl::{AclConfig, AclEntry, AclStore};
pub use alloc::{AllocTracker, Reservation};
pub use group::{GroupLookup, MapGroups, NoGroups};
pub use rights::Rights;
pub use ticket::{Ticket, TicketRegistry};
