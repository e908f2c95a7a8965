//! Per-mesa queue coordination.
//!
//! Exactly one item per mesa is `MOSTRANDO` whenever any non-`HECHO` item
//! exists; completing or removing the displayed item promotes the next
//! `EN_COLA` item by position. The coordinator is pure data manipulation;
//! the registry owns locking and clock access.

use chrono::{DateTime, Utc};

use crate::domain::{Error, ItemId, QueueItem, QueueStatus};

/// Ordered queue of display jobs for one mesa.
#[derive(Debug, Default, Clone)]
pub struct MesaQueue {
    items: Vec<QueueItem>,
}

impl MesaQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Item currently on the projector, if any.
    pub fn current(&self) -> Option<&QueueItem> {
        self.items
            .iter()
            .find(|item| item.status == QueueStatus::Mostrando)
    }

    pub fn get(&self, id: ItemId) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    /// Append a new item. When nothing is displaying it becomes the head and
    /// starts displaying immediately.
    pub fn enqueue(&mut self, mut item: QueueItem) {
        item.position = self.next_position();
        item.status = QueueStatus::EnCola;
        self.items.push(item);
        if self.current().is_none() {
            self.promote_next();
        }
    }

    /// Mark an item done. If it was displaying, the first `EN_COLA` item by
    /// position takes over.
    ///
    /// # Errors
    ///
    /// Not-found for an unknown id; conflict when the item is already done.
    pub fn mark_done(
        &mut self,
        id: ItemId,
        at: DateTime<Utc>,
        by: Option<String>,
    ) -> Result<(), Error> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| Error::not_found("queue item not found"))?;
        if item.status == QueueStatus::Hecho {
            return Err(Error::conflict("queue item is already done"));
        }
        item.status = QueueStatus::Hecho;
        item.done_at = Some(at);
        item.done_by = by;
        if self.current().is_none() {
            self.promote_next();
        }
        Ok(())
    }

    /// Force an item onto the projector. Any currently displayed item is
    /// demoted back to `EN_COLA`; done items cannot be shown again.
    pub fn show(&mut self, id: ItemId) -> Result<(), Error> {
        let target = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| Error::not_found("queue item not found"))?;
        if self.items[target].status == QueueStatus::Hecho {
            return Err(Error::conflict("cannot show a finished item"));
        }
        for item in &mut self.items {
            if item.status == QueueStatus::Mostrando {
                item.status = QueueStatus::EnCola;
            }
        }
        self.items[target].status = QueueStatus::Mostrando;
        Ok(())
    }

    /// Remove an item outright. Removing the displayed item promotes the
    /// next one, same as completion.
    pub fn remove(&mut self, id: ItemId) -> Result<QueueItem, Error> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| Error::not_found("queue item not found"))?;
        let removed = self.items.remove(index);
        if removed.status == QueueStatus::Mostrando {
            self.promote_next();
        }
        Ok(removed)
    }

    /// Move a pending item to a new slot in the pending order. Slot 0 is
    /// reserved for the displayed item, so while something is showing a
    /// target of 0 is coerced to 1.
    pub fn reorder(&mut self, id: ItemId, target: usize) -> Result<(), Error> {
        let item = self
            .get(id)
            .ok_or_else(|| Error::not_found("queue item not found"))?;
        if item.status != QueueStatus::EnCola {
            return Err(Error::conflict("only waiting items can be reordered"));
        }

        let mut ordering: Vec<ItemId> = self.ordered().into_iter().map(|item| item.id).collect();
        let from = ordering
            .iter()
            .position(|&existing| existing == id)
            .ok_or_else(|| Error::not_found("queue item not found"))?;
        let displaying = self.current().is_some();
        let floor = usize::from(displaying);
        let to = target.max(floor).min(ordering.len().saturating_sub(1));

        let moved = ordering.remove(from);
        ordering.insert(to, moved);

        for (position, ordered_id) in ordering.iter().enumerate() {
            if let Some(item) = self.items.iter_mut().find(|item| item.id == *ordered_id) {
                item.position = position as u32;
            }
        }
        Ok(())
    }

    /// Live items in display order: the `MOSTRANDO` item first, then
    /// `EN_COLA` items by position.
    pub fn ordered(&self) -> Vec<&QueueItem> {
        let mut live: Vec<&QueueItem> = self
            .items
            .iter()
            .filter(|item| item.status != QueueStatus::Hecho)
            .collect();
        live.sort_by_key(|item| {
            (
                item.status != QueueStatus::Mostrando,
                item.position,
                item.id.0,
            )
        });
        live
    }

    /// Every item including done ones, insertion order.
    pub fn all(&self) -> &[QueueItem] {
        &self.items
    }

    fn next_position(&self) -> u32 {
        self.items
            .iter()
            .map(|item| item.position + 1)
            .max()
            .unwrap_or(0)
    }

    fn promote_next(&mut self) {
        if let Some(next) = self
            .items
            .iter_mut()
            .filter(|item| item.status == QueueStatus::EnCola)
            .min_by_key(|item| (item.position, item.id.0))
        {
            next.status = QueueStatus::Mostrando;
        }
    }
}
