use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One step of pax-based pricing: parties of at least `minimum_party_size`
/// pay `unit_price` per head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTier {
    pub minimum_party_size: u32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOn {
    pub id: Uuid,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOnSelection {
    pub add_on_id: Uuid,
    pub quantity: u32,
}

/// Price rules of a bookable catalog item. Read-only outside catalog management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingCatalogEntry {
    pub id: Uuid,
    pub flat_adult_price: Option<Decimal>,
    pub flat_child_price: Option<Decimal>,
    #[serde(default)]
    pub tiered_adult_pricing: Vec<PriceTier>,
    #[serde(default)]
    pub tiered_child_pricing: Vec<PriceTier>,
    #[serde(default)]
    pub add_ons: Vec<AddOn>,
}

/// Pricing mode for one party type, borrowed from a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PartyPricing<'a> {
    Flat(Decimal),
    Tiered(&'a [PriceTier]),
    Unpriced,
    Conflicting,
}

impl PricingCatalogEntry {
    pub fn adult_pricing(&self) -> PartyPricing<'_> {
        Self::party_pricing(self.flat_adult_price, &self.tiered_adult_pricing)
    }

    pub fn child_pricing(&self) -> PartyPricing<'_> {
        Self::party_pricing(self.flat_child_price, &self.tiered_child_pricing)
    }

    fn party_pricing(flat: Option<Decimal>, tiers: &[PriceTier]) -> PartyPricing<'_> {
        match (flat, tiers.is_empty()) {
            (Some(_), false) => PartyPricing::Conflicting,
            (Some(price), true) => PartyPricing::Flat(price),
            (None, false) => PartyPricing::Tiered(tiers),
            (None, true) => PartyPricing::Unpriced,
        }
    }

    pub fn add_on(&self, id: Uuid) -> Option<&AddOn> {
        self.add_ons.iter().find(|a| a.id == id)
    }

    /// Sorts tier tables ascending by threshold.
    pub fn normalized(mut self) -> Self {
        self.tiered_adult_pricing
            .sort_by_key(|t| t.minimum_party_size);
        self.tiered_child_pricing
            .sort_by_key(|t| t.minimum_party_size);
        self
    }
}
