//! Length bounds checked before any engine call.

use crate::error::StoreError;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_kv_len: usize,
}

impl Limits {
    pub fn new(max_kv_len: usize) -> Self {
        Self { max_kv_len }
    }

    pub fn check_key(&self, key: &[u8]) -> Result<(), StoreError> {
        if key.len() > self.max_kv_len {
            return Err(StoreError::KeyTooLong {
                len: key.len(),
                max: self.max_kv_len,
            });
        }
        Ok(())
    }

    pub fn check_value(&self, value: &[u8]) -> Result<(), StoreError> {
        if value.len() > self.max_kv_len {
            return Err(StoreError::ValueTooLong {
                len: value.len(),
                max: self.max_kv_len,
            });
        }
        Ok(())
    }

    pub fn check_entry(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_key(key)?;
        self.check_value(value)
    }
}
