/// Entity kinds the audit trail distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEntity {
    Order,
    Trade,
}

impl EventEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventEntity::Order => "ORDER",
            EventEntity::Trade => "TRADE",
        }
    }
}
