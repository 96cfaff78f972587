//! Slot-based inventory shared by the server (authoritative) and the client
//! (display copy received through `inventory:updated`).

use crate::types::ItemStack;
use serde::{Deserialize, Serialize};

pub const DEFAULT_INVENTORY_CAPACITY: usize = 20;

/// One slot per distinct item key. Stacks of the same item never need a new slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub items: Vec<ItemStack>,
    pub gold: u64,
    pub capacity: usize,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INVENTORY_CAPACITY)
    }
}

impl Inventory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            gold: 0,
            capacity,
        }
    }

    pub fn quantity_of(&self, item: &str) -> u32 {
        self.items
            .iter()
            .find(|stack| stack.item == item)
            .map(|stack| stack.quantity)
            .unwrap_or(0)
    }

    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.items.len())
    }

    /// Returns true if every stack could be added without exceeding capacity.
    pub fn can_accept(&self, incoming: &[ItemStack]) -> bool {
        let mut new_keys: Vec<&str> = Vec::new();
        for stack in incoming {
            if stack.quantity == 0 || self.quantity_of(&stack.item) > 0 {
                continue;
            }
            if !new_keys.contains(&stack.item.as_str()) {
                new_keys.push(stack.item.as_str());
            }
        }
        new_keys.len() <= self.free_slots()
    }

    /// Returns true if the inventory holds at least the given stacks and gold.
    /// Duplicate stacks whose total overflows can never be held.
    pub fn contains(&self, stacks: &[ItemStack], gold: u64) -> bool {
        if self.gold < gold {
            return false;
        }
        let mut wanted: Vec<ItemStack> = Vec::new();
        for stack in stacks {
            match wanted.iter_mut().find(|w| w.item == stack.item) {
                Some(w) => match w.quantity.checked_add(stack.quantity) {
                    Some(total) => w.quantity = total,
                    None => return false,
                },
                None => wanted.push(stack.clone()),
            }
        }
        wanted
            .iter()
            .all(|stack| self.quantity_of(&stack.item) >= stack.quantity)
    }

    /// Adds a stack, merging into an existing slot. Returns false when full
    /// or when the merged stack would overflow.
    pub fn add(&mut self, stack: &ItemStack) -> bool {
        if stack.quantity == 0 {
            return true;
        }
        if let Some(existing) = self.items.iter_mut().find(|s| s.item == stack.item) {
            return match existing.quantity.checked_add(stack.quantity) {
                Some(total) => {
                    existing.quantity = total;
                    true
                }
                None => false,
            };
        }
        if self.items.len() >= self.capacity {
            return false;
        }
        self.items.push(stack.clone());
        true
    }

    /// Removes a quantity of an item, dropping the slot when it reaches zero.
    pub fn remove(&mut self, stack: &ItemStack) -> bool {
        let Some(index) = self.items.iter().position(|s| s.item == stack.item) else {
            return stack.quantity == 0;
        };
        if self.items[index].quantity < stack.quantity {
            return false;
        }
        self.items[index].quantity -= stack.quantity;
        if self.items[index].quantity == 0 {
            self.items.remove(index);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_merges_stacks() {
        let mut inventory = Inventory::with_capacity(1);
        assert!(inventory.add(&ItemStack::new("arrow", 10)));
        assert!(inventory.add(&ItemStack::new("arrow", 5)));
        assert_eq!(inventory.quantity_of("arrow"), 15);
        assert!(!inventory.add(&ItemStack::new("bow", 1)));
    }

    #[test]
    fn test_remove_frees_slot() {
        let mut inventory = Inventory::with_capacity(2);
        inventory.add(&ItemStack::new("sword", 1));
        assert!(inventory.remove(&ItemStack::new("sword", 1)));
        assert!(inventory.items.is_empty());
        assert!(!inventory.remove(&ItemStack::new("sword", 1)));
    }

    #[test]
    fn test_can_accept_counts_distinct_new_keys() {
        let mut inventory = Inventory::with_capacity(2);
        inventory.add(&ItemStack::new("sword", 1));

        assert!(inventory.can_accept(&[ItemStack::new("sword", 3), ItemStack::new("shield", 1)]));
        assert!(inventory.can_accept(&[ItemStack::new("shield", 1), ItemStack::new("shield", 2)]));
        assert!(!inventory.can_accept(&[ItemStack::new("shield", 1), ItemStack::new("helm", 1)]));
    }

    #[test]
    fn test_contains_sums_duplicate_stacks() {
        let mut inventory = Inventory::default();
        inventory.gold = 100;
        inventory.add(&ItemStack::new("potion", 3));

        assert!(inventory.contains(&[ItemStack::new("potion", 2)], 100));
        assert!(!inventory.contains(&[ItemStack::new("potion", 2), ItemStack::new("potion", 2)], 0));
        assert!(!inventory.contains(&[], 101));
    }

    #[test]
    fn test_overflowing_quantities_are_refused() {
        let mut inventory = Inventory::default();
        inventory.add(&ItemStack::new("potion", 3));

        let wanted = [ItemStack::new("potion", u32::MAX), ItemStack::new("potion", 1)];
        assert!(!inventory.contains(&wanted, 0));
        assert!(!inventory.add(&ItemStack::new("potion", u32::MAX)));
        assert_eq!(inventory.quantity_of("potion"), 3);
    }
}
