pub mod quest;
pub mod referral;
pub mod user;
