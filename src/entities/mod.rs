pub mod completed_quest;
pub mod quest;
pub mod referral;
pub mod referral_code;
pub mod user;
