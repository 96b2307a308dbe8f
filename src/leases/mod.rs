// Lease bookkeeping for the copy monitor
//
// Provides exclusive hold on a source object for the duration of one copy
// attempt, with renewal driven by elapsed time since the last renewal.

pub mod clock;
pub mod keeper;
pub mod lease;

pub use clock::RenewalClock;
pub use keeper::HeldLease;
pub use lease::LeaseHandle;
