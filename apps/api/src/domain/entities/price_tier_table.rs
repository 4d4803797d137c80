use std::collections::HashSet;

use tally_types::Plan;

/// Classifies subscription price ids into plans.
///
/// Only premium prices are listed. Every other price, including ones created
/// after this table was configured, is standard.
#[derive(Debug, Clone, Default)]
pub struct PriceTierTable {
    premium_price_ids: HashSet<String>,
}

impl PriceTierTable {
    pub fn new<I, S>(premium_price_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            premium_price_ids: premium_price_ids
                .into_iter()
                .map(Into::into)
                .filter(|id: &String| !id.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, price_id: Option<&str>) -> Plan {
        match price_id {
            Some(id) if self.premium_price_ids.contains(id) => Plan::Premium,
            _ => Plan::Standard,
        }
    }
}
