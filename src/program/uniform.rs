//! Per-program uniform and texture-unit caches

use std::collections::HashMap;

use crate::backend::UniformValue;

/// Last value written for each uniform name
#[derive(Debug, Clone, Default)]
pub struct UniformCache {
    values: HashMap<String, UniformValue>,
}

impl UniformCache {
    /// True unless the cached value is bit-identical to `value`
    pub fn needs_write(&self, name: &str, value: &UniformValue) -> bool {
        !matches!(self.values.get(name), Some(cached) if cached.bit_eq(value))
    }

    pub fn store(&mut self, name: &str, value: UniformValue) {
        match self.values.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.values.insert(name.to_string(), value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.get(name)
    }

    /// Forget every cached value so the next write of each name reaches the device
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// First-come-first-served texture unit assignment, stable for the program's lifetime
#[derive(Debug, Clone, Default)]
pub struct TextureUnits {
    units: HashMap<String, u32>,
    next: u32,
}

impl TextureUnits {
    pub fn get(&self, name: &str) -> Option<u32> {
        self.units.get(name).copied()
    }

    /// Unit that the next new name would receive
    pub fn next_free(&self) -> u32 {
        self.next
    }

    /// Record `name` at the next free unit and return it
    pub fn assign(&mut self, name: &str) -> u32 {
        if let Some(unit) = self.get(name) {
            return unit;
        }
        let unit = self.next;
        self.units.insert(name.to_string(), unit);
        self.next += 1;
        unit
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.units.iter().map(|(name, unit)| (name.as_str(), *unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_elides_identical_values() {
        let mut cache = UniformCache::default();
        let value = UniformValue::Float(0.5);
        assert!(cache.needs_write("u_alpha", &value));
        cache.store("u_alpha", value);
        assert!(!cache.needs_write("u_alpha", &UniformValue::Float(0.5)));
        assert!(cache.needs_write("u_alpha", &UniformValue::Float(0.25)));
        cache.clear();
        assert!(cache.needs_write("u_alpha", &value));
    }

    #[test]
    fn test_units_assigned_once() {
        let mut units = TextureUnits::default();
        assert_eq!(units.assign("u_albedo"), 0);
        assert_eq!(units.assign("u_normal"), 1);
        assert_eq!(units.assign("u_albedo"), 0);
        assert_eq!(units.next_free(), 2);
        assert_eq!(units.len(), 2);
    }
}
