//! Sample `Inventory` aggregate used across the test suites.

use std::collections::BTreeMap;

use chronicle_core::aggregate::{Aggregate, EventRecorder};
use chronicle_core::applier::HandlerRegistry;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stock was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    /// Stock keeping unit.
    pub sku: String,
    /// Units received.
    pub quantity: u32,
}

impl DomainEvent for ItemAdded {
    const EVENT_TYPE: &'static str = "ItemAdded";
}

/// Stock was shipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    /// Stock keeping unit.
    pub sku: String,
    /// Units shipped.
    pub quantity: u32,
}

impl DomainEvent for ItemRemoved {
    const EVENT_TYPE: &'static str = "ItemRemoved";
}

/// An event `Inventory` has no handler for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAudited {
    /// Name of the auditor.
    pub auditor: String,
}

impl DomainEvent for StockAudited {
    const EVENT_TYPE: &'static str = "StockAudited";
}

/// Stock levels per SKU.
#[derive(Debug)]
pub struct Inventory {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Units on hand per SKU.
    pub stock: BTreeMap<String, u32>,
    recorder: EventRecorder,
}

impl Inventory {
    /// Creates an empty inventory.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            stock: BTreeMap::new(),
            recorder: EventRecorder::new(),
        }
    }

    /// Receives `quantity` units of `sku`.
    ///
    /// # Errors
    ///
    /// Propagates the applier's error.
    pub fn add(&mut self, sku: &str, quantity: u32) -> Result<(), DomainError> {
        self.apply(ItemAdded {
            sku: sku.to_owned(),
            quantity,
        })
    }

    /// Ships `quantity` units of `sku`.
    ///
    /// # Errors
    ///
    /// Propagates the applier's error.
    pub fn remove(&mut self, sku: &str, quantity: u32) -> Result<(), DomainError> {
        self.apply(ItemRemoved {
            sku: sku.to_owned(),
            quantity,
        })
    }

    /// Units of `sku` on hand.
    #[must_use]
    pub fn on_hand(&self, sku: &str) -> u32 {
        self.stock.get(sku).copied().unwrap_or(0)
    }

    fn on_item_added(&mut self, event: &ItemAdded) {
        *self.stock.entry(event.sku.clone()).or_insert(0) += event.quantity;
    }

    fn on_item_removed(&mut self, event: &ItemRemoved) {
        let on_hand = self.stock.entry(event.sku.clone()).or_insert(0);
        *on_hand = on_hand.saturating_sub(event.quantity);
    }
}

impl Aggregate for Inventory {
    const AGGREGATE_TYPE: &'static str = "Inventory";
    type Id = Uuid;

    fn blank(id: &Uuid) -> Self {
        Self::new(*id)
    }

    fn register_handlers(handlers: &mut HandlerRegistry<Self>) {
        handlers.on(Self::on_item_added).on(Self::on_item_removed);
    }

    fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    fn recorder_mut(&mut self) -> &mut EventRecorder {
        &mut self.recorder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_update_stock() {
        // Arrange
        let mut inventory = Inventory::new(Uuid::new_v4());

        // Act
        inventory.add("apple", 5).unwrap();
        inventory.remove("apple", 2).unwrap();

        // Assert
        assert_eq!(inventory.on_hand("apple"), 3);
        assert_eq!(inventory.uncommitted_events().len(), 2);
    }

    #[test]
    fn test_unregistered_event_is_rejected() {
        let mut inventory = Inventory::new(Uuid::new_v4());

        let result = inventory.apply(StockAudited {
            auditor: "kim".to_owned(),
        });

        match result {
            Err(DomainError::MissingEventHandler {
                aggregate_type,
                event_type,
            }) => {
                assert_eq!(aggregate_type, "Inventory");
                assert_eq!(event_type, "StockAudited");
            }
            other => panic!("expected MissingEventHandler, got {other:?}"),
        }
        assert!(inventory.uncommitted_events().is_empty());
    }
}
