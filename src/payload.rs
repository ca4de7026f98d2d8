use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of a grid extraction job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(rename = "datetime_start")]
    pub after: DateTime<Utc>,
    #[serde(rename = "datetime_end")]
    pub before: DateTime<Utc>,
    pub watershed_id: Uuid,
    #[serde(rename = "product_id")]
    pub product_ids: Vec<Uuid>,
}

impl ExtractionPayload {
    pub fn new(
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        watershed_id: Uuid,
        product_ids: Vec<Uuid>,
    ) -> Self {
        Self {
            after,
            before,
            watershed_id,
            product_ids,
        }
    }
}
