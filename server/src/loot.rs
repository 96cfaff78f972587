//! Ground items dropped by killed monsters.

use crate::error::{GameError, GameResult};
use rand::Rng;
use shared::{
    clamp_to_world, distance, ErrorCode, GroundItem, Inventory, ItemId, ItemStack, Loot,
    MonsterKind, PICKUP_RANGE,
};
use std::collections::BTreeMap;

pub const GROUND_ITEM_LIFETIME_MS: u64 = 60_000;
pub const ITEM_DROP_CHANCE: f64 = 0.3;
const SCATTER: f32 = 16.0;

#[derive(Debug)]
struct Entry {
    item: GroundItem,
    remaining_ms: u64,
}

#[derive(Debug)]
pub struct GroundItems {
    entries: BTreeMap<ItemId, Entry>,
    next_id: ItemId,
    lifetime_ms: u64,
}

impl Default for GroundItems {
    fn default() -> Self {
        Self::new(GROUND_ITEM_LIFETIME_MS)
    }
}

impl GroundItems {
    pub fn new(lifetime_ms: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            lifetime_ms,
        }
    }

    pub fn spawn(&mut self, x: f32, y: f32, loot: Loot) -> GroundItem {
        let id = self.next_id;
        self.next_id += 1;
        let item = GroundItem { id, x, y, loot };
        self.entries.insert(
            id,
            Entry {
                item: item.clone(),
                remaining_ms: self.lifetime_ms,
            },
        );
        item
    }

    /// Gold always drops; an item from the kind's table drops some of the time.
    pub fn roll_drops<R: Rng>(
        &mut self,
        kind: MonsterKind,
        x: f32,
        y: f32,
        rng: &mut R,
    ) -> Vec<GroundItem> {
        let config = kind.config();
        let exp = u64::from(config.exp);
        let gold = rng.gen_range((exp / 5).max(1)..=(exp / 2).max(1));

        let mut drops = vec![self.spawn(x, y, Loot::Gold(gold))];
        if !config.loot.is_empty() && rng.gen_bool(ITEM_DROP_CHANCE) {
            let name = config.loot[rng.gen_range(0..config.loot.len())];
            let (ix, iy) = clamp_to_world(
                x + rng.gen_range(-SCATTER..SCATTER),
                y + rng.gen_range(-SCATTER..SCATTER),
            );
            drops.push(self.spawn(ix, iy, Loot::Item(ItemStack::new(name, 1))));
        }
        drops
    }

    pub fn get(&self, id: ItemId) -> Option<&GroundItem> {
        self.entries.get(&id).map(|entry| &entry.item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<GroundItem> {
        self.entries.values().map(|entry| entry.item.clone()).collect()
    }

    /// Moves a ground item into `inventory` if the picker stands close
    /// enough and has room for it.
    pub fn pick_up(
        &mut self,
        id: ItemId,
        x: f32,
        y: f32,
        inventory: &mut Inventory,
    ) -> GameResult<GroundItem> {
        let item = self
            .get(id)
            .ok_or_else(|| GameError::unknown_target(format!("no ground item {}", id)))?;

        if distance(x, y, item.x, item.y) > PICKUP_RANGE {
            return Err(GameError::protocol(
                ErrorCode::OutOfRange,
                "item is too far away",
            ));
        }
        if let Loot::Item(stack) = &item.loot {
            if !inventory.can_accept(std::slice::from_ref(stack)) {
                return Err(GameError::capacity(
                    ErrorCode::InventoryFull,
                    "inventory is full",
                ));
            }
        }

        let Some(entry) = self.entries.remove(&id) else {
            return Err(GameError::unknown_target(format!("no ground item {}", id)));
        };
        let added = match &entry.item.loot {
            Loot::Gold(amount) => {
                inventory.gold = inventory.gold.saturating_add(*amount);
                true
            }
            Loot::Item(stack) => inventory.add(stack),
        };
        if !added {
            self.entries.insert(id, entry);
            return Err(GameError::capacity(
                ErrorCode::InventoryFull,
                "stack is full",
            ));
        }
        Ok(entry.item)
    }

    /// Advances lifetimes and returns the ids of items that vanished.
    pub fn tick(&mut self, dt_ms: u64) -> Vec<ItemId> {
        let mut expired = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            entry.remaining_ms = entry.remaining_ms.saturating_sub(dt_ms);
            if entry.remaining_ms == 0 {
                expired.push(*id);
            }
        }
        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }
}
