//! Domain records: policy versions, confirmations, one-time tokens and the
//! gated user.

pub mod confirmation;
pub mod policy;
pub mod token;
pub mod user;

pub use confirmation::Confirmation;
pub use policy::{evaluation_order, sort_for_evaluation, PolicySummary, PolicyVersion};
pub use token::OneTimeToken;
pub use user::GateUser;
