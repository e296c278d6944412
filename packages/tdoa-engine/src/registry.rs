//! Fixed-capacity anchor registry.

use tdoa_types::AnchorRecord;
use tracing::{info, warn};

use crate::error::RegistryError;

pub const DEFAULT_ANCHOR_CAPACITY: usize = 8;

/// Anchor id → coordinates. Filled once at startup, read-only afterwards.
#[derive(Debug, Clone)]
pub struct AnchorRegistry {
    anchors: Vec<AnchorRecord>,
    capacity: usize,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ANCHOR_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { anchors: Vec::with_capacity(capacity), capacity }
    }

    /// Append an anchor. Duplicate ids are rejected so `lookup` stays unambiguous.
    pub fn register(&mut self, id: u8, x: f64, y: f64) -> Result<(), RegistryError> {
        if !x.is_finite() || !y.is_finite() {
            warn!("TDOA: anchor #{id} rejected, non-finite coordinates ({x}, {y})");
            return Err(RegistryError::InvalidCoordinates { id, x, y });
        }
        if self.lookup(id).is_some() {
            warn!("TDOA: anchor #{id} already registered, keeping the first entry");
            return Err(RegistryError::DuplicateId(id));
        }
        if self.anchors.len() >= self.capacity {
            warn!("TDOA: max anchors reached ({}), dropping anchor #{id}", self.capacity);
            return Err(RegistryError::CapacityExceeded { capacity: self.capacity });
        }

        self.anchors.push(AnchorRecord { id, x, y });
        info!("TDOA: registered anchor #{id} at ({x:.2}, {y:.2})");
        Ok(())
    }

    pub fn lookup(&self, id: u8) -> Option<&AnchorRecord> {
        self.anchors.iter().find(|a| a.id == id)
    }

    pub fn count(&self) -> usize {
        self.anchors.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnchorRecord> {
        self.anchors.iter()
    }
}

impl Default for AnchorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut reg = AnchorRegistry::new();
        reg.register(0, 0.0, 0.0).unwrap();
        reg.register(7, 12.5, -3.0).unwrap();

        assert_eq!(reg.count(), 2);
        assert_eq!(reg.lookup(7), Some(&AnchorRecord { id: 7, x: 12.5, y: -3.0 }));
        assert_eq!(reg.lookup(3), None);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut reg = AnchorRegistry::with_capacity(2);
        reg.register(0, 0.0, 0.0).unwrap();
        reg.register(1, 1.0, 0.0).unwrap();

        assert_eq!(
            reg.register(2, 2.0, 0.0),
            Err(RegistryError::CapacityExceeded { capacity: 2 })
        );
        assert_eq!(reg.count(), 2);
        assert!(reg.lookup(2).is_none());
    }

    #[test]
    fn test_default_capacity_is_eight() {
        let mut reg = AnchorRegistry::new();
        for id in 0..8 {
            reg.register(id, id as f64, 0.0).unwrap();
        }
        assert!(reg.register(8, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_duplicate_id_keeps_first() {
        let mut reg = AnchorRegistry::new();
        reg.register(4, 1.0, 1.0).unwrap();
        assert_eq!(reg.register(4, 9.0, 9.0), Err(RegistryError::DuplicateId(4)));
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.lookup(4).map(|a| a.x), Some(1.0));
    }

    #[test]
    fn test_non_finite_coordinates_rejected() {
        let mut reg = AnchorRegistry::new();
        assert!(matches!(
            reg.register(1, f64::NAN, 0.0),
            Err(RegistryError::InvalidCoordinates { id: 1, .. })
        ));
        assert_eq!(reg.count(), 0);
    }
}
