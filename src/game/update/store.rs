//! Field store
//!
//! Per-entity typed values for every active field plus the set of fields
//! written since the last emitted update. Writes are validated against the
//! field table before the store is touched.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SchemaError;
use crate::game::update::fields::{
    object_fields, EntityType, FieldDef, FieldId, FieldKind, FieldTable, FieldValue,
};

/// Mutable field values of one entity
#[derive(Debug, Clone)]
pub struct FieldStore {
    entity_type: EntityType,
    values: BTreeMap<FieldId, FieldValue>,
    dirty: BTreeSet<FieldId>,
}

impl FieldStore {
    /// Create a store with every active field zeroed, except the object type
    /// mask and unit scale
    pub fn new(entity_type: EntityType) -> Self {
        let values = FieldTable::global()
            .active_fields(entity_type)
            .map(|def| (def.id, FieldValue::zero(def.kind)))
            .collect();

        let mut store = Self {
            entity_type,
            values,
            dirty: BTreeSet::new(),
        };
        store.values.insert(
            object_fields::TYPE,
            FieldValue::U32(entity_type.type_flags().bits()),
        );
        store
            .values
            .insert(object_fields::SCALE_X, FieldValue::F32(1.0));
        store
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Entity guid as stored in `OBJECT_FIELD_GUID`
    pub fn guid(&self) -> u64 {
        self.get(object_fields::GUID)
            .and_then(FieldValue::as_u64)
            .unwrap_or_default()
    }

    /// Current value of a field, `None` if it is not active for this entity
    pub fn get(&self, id: FieldId) -> Option<FieldValue> {
        self.values.get(&id).copied()
    }

    fn check(&self, id: FieldId) -> Result<&'static FieldDef, SchemaError> {
        let def = FieldTable::global()
            .get(id)
            .ok_or(SchemaError::UnknownField(id))?;
        if !self.entity_type.has_block(id.block()) {
            return Err(SchemaError::InactiveField {
                field: id,
                entity_type: self.entity_type.name(),
            });
        }
        Ok(def)
    }

    fn check_value(&self, id: FieldId, value: FieldValue) -> Result<(), SchemaError> {
        let def = self.check(id)?;
        if def.kind != value.kind() {
            return Err(SchemaError::KindMismatch {
                field: id,
                expected: def.kind,
                actual: value.kind(),
            });
        }
        Ok(())
    }

    /// Write a value and mark the field dirty
    ///
    /// Every successful write marks the field, even when the value is
    /// unchanged.
    pub fn set(&mut self, id: FieldId, value: impl Into<FieldValue>) -> Result<(), SchemaError> {
        let value = value.into();
        self.check_value(id, value)?;
        self.values.insert(id, value);
        self.dirty.insert(id);
        Ok(())
    }

    /// Write a value, marking the field dirty only if it differs
    ///
    /// Returns whether the stored value changed.
    pub fn set_if_changed(
        &mut self,
        id: FieldId,
        value: impl Into<FieldValue>,
    ) -> Result<bool, SchemaError> {
        let value = value.into();
        self.check_value(id, value)?;
        if self.values.get(&id) == Some(&value) {
            return Ok(false);
        }
        self.values.insert(id, value);
        self.dirty.insert(id);
        Ok(true)
    }

    /// Write an integer, converting it to the field's declared kind
    pub fn set_integer(&mut self, id: FieldId, value: i64) -> Result<(), SchemaError> {
        let def = self.check(id)?;
        let overflow = || SchemaError::Overflow {
            field: id,
            kind: def.kind,
            value,
        };
        let typed = match def.kind {
            FieldKind::UInt32 => FieldValue::U32(u32::try_from(value).map_err(|_| overflow())?),
            FieldKind::Int32 => FieldValue::I32(i32::try_from(value).map_err(|_| overflow())?),
            FieldKind::UInt64 => FieldValue::U64(u64::try_from(value).map_err(|_| overflow())?),
            FieldKind::Float32 => {
                return Err(SchemaError::KindMismatch {
                    field: id,
                    expected: FieldKind::Float32,
                    actual: FieldKind::Int32,
                })
            }
        };
        self.set(id, typed)
    }

    /// Pack four 8-bit parts into a composite field
    pub fn composite_set(&mut self, id: FieldId, parts: [u8; 4]) -> Result<(), SchemaError> {
        let def = self.check(id)?;
        let word = def
            .packing
            .pack_bytes(parts)
            .ok_or(SchemaError::NotComposite(id))?;
        self.set(id, word)
    }

    /// Pack two 16-bit parts into a composite field
    pub fn composite_set_halves(&mut self, id: FieldId, parts: [u16; 2]) -> Result<(), SchemaError> {
        let def = self.check(id)?;
        let word = def
            .packing
            .pack_halves(parts)
            .ok_or(SchemaError::NotComposite(id))?;
        self.set(id, word)
    }

    /// Unpack a byte composite
    pub fn composite_get(&self, id: FieldId) -> Result<[u8; 4], SchemaError> {
        let def = self.check(id)?;
        let word = self.get(id).map(FieldValue::as_u32).unwrap_or_default();
        def.packing
            .unpack_bytes(word)
            .ok_or(SchemaError::NotComposite(id))
    }

    /// Unpack a 16/16 composite
    pub fn composite_get_halves(&self, id: FieldId) -> Result<[u16; 2], SchemaError> {
        let def = self.check(id)?;
        let word = self.get(id).map(FieldValue::as_u32).unwrap_or_default();
        def.packing
            .unpack_halves(word)
            .ok_or(SchemaError::NotComposite(id))
    }

    /// Immutable copy of every active value
    pub fn snapshot(&self) -> FieldSnapshot {
        FieldSnapshot {
            entity_type: self.entity_type,
            values: self.values.iter().map(|(id, v)| (*id, *v)).collect(),
        }
    }

    /// Iterate current values in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (FieldId, FieldValue)> + '_ {
        self.values.iter().map(|(id, v)| (*id, *v))
    }

    /// Take the dirty set, ascending
    pub fn drain_dirty(&mut self) -> Vec<FieldId> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// Forget pending changes after a full encode
    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    pub fn is_dirty(&self, id: FieldId) -> bool {
        self.dirty.contains(&id)
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }
}

/// Immutable (id, value) pairs sorted by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSnapshot {
    entity_type: EntityType,
    values: Vec<(FieldId, FieldValue)>,
}

impl FieldSnapshot {
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn get(&self, id: FieldId) -> Option<FieldValue> {
        self.values
            .binary_search_by_key(&id, |(field, _)| *field)
            .ok()
            .map(|index| self.values[index].1)
    }

    pub fn guid(&self) -> u64 {
        self.get(object_fields::GUID)
            .and_then(FieldValue::as_u64)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, FieldValue)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::update::fields::{avatar_fields, unit_fields};

    #[test]
    fn test_new_store_zeroes_active_fields() {
        let store = FieldStore::new(EntityType::Unit);
        assert_eq!(store.get(unit_fields::HEALTH), Some(FieldValue::U32(0)));
        assert_eq!(store.get(avatar_fields::XP), None);
        assert_eq!(store.get(object_fields::TYPE), Some(FieldValue::U32(0x9)));
        assert!(!store.has_changes());
    }

    #[test]
    fn test_set_marks_dirty_on_every_write() {
        let mut store = FieldStore::new(EntityType::Avatar);
        store.set(unit_fields::LEVEL, 1u32).unwrap();
        store.drain_dirty();

        store.set(unit_fields::LEVEL, 1u32).unwrap();
        assert!(store.is_dirty(unit_fields::LEVEL));

        store.drain_dirty();
        assert!(!store.set_if_changed(unit_fields::LEVEL, 1u32).unwrap());
        assert!(!store.has_changes());
    }

    #[test]
    fn test_kind_mismatch_leaves_store_untouched() {
        let mut store = FieldStore::new(EntityType::Avatar);
        let err = store.set(unit_fields::LEVEL, 1.5f32).unwrap_err();
        assert!(matches!(err, SchemaError::KindMismatch { .. }));
        assert_eq!(store.get(unit_fields::LEVEL), Some(FieldValue::U32(0)));
        assert!(!store.has_changes());
    }

    #[test]
    fn test_inactive_field_rejected() {
        let mut store = FieldStore::new(EntityType::Unit);
        let err = store.set(avatar_fields::XP, 10u32).unwrap_err();
        assert!(matches!(err, SchemaError::InactiveField { .. }));
    }

    #[test]
    fn test_set_integer_range_checked() {
        let mut store = FieldStore::new(EntityType::Avatar);
        store.set_integer(unit_fields::HEALTH, 500).unwrap();
        assert_eq!(store.get(unit_fields::HEALTH), Some(FieldValue::U32(500)));

        let err = store.set_integer(unit_fields::HEALTH, -1).unwrap_err();
        assert!(matches!(err, SchemaError::Overflow { .. }));

        let err = store
            .set_integer(unit_fields::HEALTH, u32::MAX as i64 + 1)
            .unwrap_err();
        assert!(matches!(err, SchemaError::Overflow { .. }));

        let resistance = unit_fields::RESISTANCES.nth(1).unwrap();
        store.set_integer(resistance, -25).unwrap();
        assert_eq!(store.get(resistance), Some(FieldValue::I32(-25)));

        assert!(store.set_integer(unit_fields::BOUNDING_RADIUS, 1).is_err());
    }

    #[test]
    fn test_composite_little_endian() {
        let mut store = FieldStore::new(EntityType::Avatar);
        store.composite_set(unit_fields::BYTES_0, [1, 4, 0, 3]).unwrap();

        assert_eq!(
            store.get(unit_fields::BYTES_0),
            Some(FieldValue::U32(0x0300_0401))
        );
        assert_eq!(store.composite_get(unit_fields::BYTES_0).unwrap(), [1, 4, 0, 3]);
        assert!(store.is_dirty(unit_fields::BYTES_0));
    }

    #[test]
    fn test_composite_big_endian() {
        let mut store = FieldStore::new(EntityType::Avatar);
        store.composite_set(avatar_fields::BYTES_2, [0x08, 2, 5, 0]).unwrap();

        assert_eq!(
            store.get(avatar_fields::BYTES_2),
            Some(FieldValue::U32(0x0802_0500))
        );
        assert_eq!(
            store.composite_get(avatar_fields::BYTES_2).unwrap(),
            [0x08, 2, 5, 0]
        );
    }

    #[test]
    fn test_composite_halves() {
        let mut store = FieldStore::new(EntityType::Unit);
        store
            .composite_set_halves(unit_fields::DAMAGE, [12, 30])
            .unwrap();
        assert_eq!(
            store.composite_get_halves(unit_fields::DAMAGE).unwrap(),
            [12, 30]
        );
        assert!(store.composite_set(unit_fields::DAMAGE, [0; 4]).is_err());
    }

    #[test]
    fn test_non_composite_rejected() {
        let mut store = FieldStore::new(EntityType::Avatar);
        let err = store.composite_set(unit_fields::LEVEL, [1, 2, 3, 4]).unwrap_err();
        assert_eq!(err, SchemaError::NotComposite(unit_fields::LEVEL));
    }

    #[test]
    fn test_drain_dirty_is_ascending_and_clears() {
        let mut store = FieldStore::new(EntityType::Avatar);
        store.set(avatar_fields::XP, 5u32).unwrap();
        store.set(unit_fields::LEVEL, 2u32).unwrap();
        store.set(object_fields::GUID, 9u64).unwrap();

        assert_eq!(
            store.drain_dirty(),
            vec![object_fields::GUID, unit_fields::LEVEL, avatar_fields::XP]
        );
        assert!(store.drain_dirty().is_empty());
    }

    #[test]
    fn test_snapshot_lookup() {
        let mut store = FieldStore::new(EntityType::Avatar);
        store.set(object_fields::GUID, 0x42u64).unwrap();
        store.set(avatar_fields::XP, 77u32).unwrap();

        let snapshot = store.snapshot();
        store.set(avatar_fields::XP, 78u32).unwrap();

        assert_eq!(snapshot.guid(), 0x42);
        assert_eq!(snapshot.get(avatar_fields::XP), Some(FieldValue::U32(77)));
        assert_eq!(
            snapshot.len(),
            FieldTable::global().active_fields(EntityType::Avatar).count()
        );
    }
}
