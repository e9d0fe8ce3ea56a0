use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralCodeView {
    pub code: String,
    pub uses_count: i64,
    pub link: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralView {
    pub referred_wallet: String,
    pub referral_code: String,
    pub points_awarded: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralStatsView {
    pub wallet: String,
    pub codes: Vec<ReferralCodeView>,
    pub referrals: Vec<ReferralView>,
    pub total_referrals: u64,
    pub total_points_earned: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeCheckResponse {
    pub code: String,
    pub valid: bool,
    pub reason: Option<&'static str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessReferralRequest {
    pub referral_code: String,
    pub referred_wallet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReferralResponse {
    pub success: bool,
}
