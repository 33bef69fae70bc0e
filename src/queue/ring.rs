use std::collections::{HashMap, VecDeque};

/// Round-robin rotation over categories, each owning a FIFO of job UIDs.
///
/// Invariants:
/// - every category in the rotation has a non-empty FIFO
/// - every FIFO belongs to exactly one category in the rotation
///
/// [`CategoryRing::pop`] takes the front job of the head category and then
/// moves that category to the back of the rotation, or drops it entirely if
/// its FIFO became empty. [`CategoryRing::interleaved`] previews exactly that
/// order without modifying anything.
#[derive(Debug, Default, Clone)]
pub struct CategoryRing {
    rotation: VecDeque<String>,
    fifos: HashMap<String, VecDeque<String>>,
}

impl CategoryRing {
    /// Append a job UID to the FIFO of `category`, adding the category to
    /// the back of the rotation if it is new.
    pub fn push(&mut self, category: &str, uid: String) -> bool {
        let created = !self.fifos.contains_key(category);
        if created {
            self.rotation.push_back(category.to_string());
        }
        self.fifos.entry(category.to_string()).or_default().push_back(uid);
        created
    }

    /// Take the next job in round-robin order, returning `(category, uid)`.
    pub fn pop(&mut self) -> Option<(String, String)> {
        let category = self.rotation.pop_front()?;
        let fifo = self.fifos.get_mut(&category)?;
        let uid = fifo.pop_front()?;
        if fifo.is_empty() {
            self.fifos.remove(&category);
        } else {
            self.rotation.push_back(category.clone());
        }
        Some((category, uid))
    }

    /// Remove a pending job. Returns `false` if it isn't queued here.
    pub fn remove(&mut self, category: &str, uid: &str) -> bool {
        let Some(fifo) = self.fifos.get_mut(category) else {
            return false;
        };
        let Some(index) = fifo.iter().position(|queued| queued == uid) else {
            return false;
        };
        fifo.remove(index);
        if fifo.is_empty() {
            self.fifos.remove(category);
            self.rotation.retain(|c| c != category);
        }
        true
    }

    #[cfg(test)]
    pub fn contains(&self, category: &str, uid: &str) -> bool {
        self.fifos.get(category).map_or(false, |fifo| fifo.iter().any(|queued| queued == uid))
    }

    /// Categories in their current rotation order.
    #[cfg(test)]
    pub fn categories(&self) -> Vec<&str> {
        self.rotation.iter().map(String::as_str).collect()
    }

    /// Number of pending jobs over all categories.
    pub fn len(&self) -> usize {
        self.fifos.values().map(VecDeque::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rotation.is_empty()
    }

    /// All pending UIDs in the order successive `pop` calls would return them.
    pub fn interleaved(&self) -> Vec<String> {
        let fifos: Vec<&VecDeque<String>> =
            self.rotation.iter().filter_map(|category| self.fifos.get(category)).collect();
        let rounds = fifos.iter().map(|fifo| fifo.len()).max().unwrap_or(0);

        let mut order = Vec::with_capacity(self.len());
        for round in 0..rounds {
            order.extend(fifos.iter().filter_map(|fifo| fifo.get(round).cloned()));
        }
        order
    }
}
