//! Concrete policy kinds supplementing the distilled spec (see
//! `SPEC_FULL.md` "Supplemented: concrete policy kinds").

pub mod deletion;
pub mod lb_member;

pub use deletion::DeletionPolicy;
pub use lb_member::LbMemberPolicy;
