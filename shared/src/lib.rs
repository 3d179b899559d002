//! Lab machine reservations: domain records, the availability and transition
//! rules, the time math shared with inventory checkouts, and the console that
//! runs them against a store.

pub mod availability;
pub mod clock;
pub mod console;
pub mod error;
pub mod governance;
pub mod inventory;
pub mod memory_store;
pub mod models;
pub mod policy;
pub mod store;
pub mod time_math;
pub mod transitions;

pub use availability::{check_availability, Availability};
pub use clock::{Clock, FixedClock, SystemClock};
pub use console::{LabConsole, MachineView};
pub use error::{LabError, LabResult};
pub use inventory::{Checkout, CheckoutPatch};
pub use memory_store::InMemoryStore;
pub use models::*;
pub use policy::ReservationPolicy;
pub use store::LabStore;
pub use transitions::MachineTarget;
