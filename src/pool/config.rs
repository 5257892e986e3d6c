//! Buffer pool manager configuration.

use std::collections::HashMap;

use crate::types::PageSize;

/// Per-page-size cache capacity, I/O thread count, and spare staging
/// buffer allowance for a [`crate::pool::BufferPoolManager`].
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    capacities: HashMap<PageSize, usize>,
    default_capacity: usize,
    num_io_threads: usize,
    spare_buffers_per_page_size: usize,
}

impl BufferPoolConfig {
    pub fn builder() -> BufferPoolConfigBuilder {
        BufferPoolConfigBuilder::default()
    }

    pub fn capacity_for(&self, page_size: PageSize) -> usize {
        self.capacities
            .get(&page_size)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    pub fn num_io_threads(&self) -> usize {
        self.num_io_threads
    }

    pub fn spare_buffers_per_page_size(&self) -> usize {
        self.spare_buffers_per_page_size
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            capacities: HashMap::new(),
            default_capacity: 1024,
            num_io_threads: num_cpus::get().max(1).min(4),
            spare_buffers_per_page_size: 8,
        }
    }
}

/// Fluent builder for [`BufferPoolConfig`], mirroring the teacher's
/// `BufferPoolBuilder` convention of defaulting every field and letting
/// call sites override only what they care about.
#[derive(Debug, Default)]
pub struct BufferPoolConfigBuilder {
    config: BufferPoolConfig,
}

impl BufferPoolConfigBuilder {
    pub fn capacity(mut self, page_size: PageSize, capacity: usize) -> Self {
        self.config.capacities.insert(page_size, capacity);
        self
    }

    pub fn default_capacity(mut self, capacity: usize) -> Self {
        self.config.default_capacity = capacity;
        self
    }

    pub fn num_io_threads(mut self, count: usize) -> Self {
        self.config.num_io_threads = count.max(1);
        self
    }

    pub fn spare_buffers_per_page_size(mut self, count: usize) -> Self {
        self.config.spare_buffers_per_page_size = count;
        self
    }

    pub fn build(self) -> BufferPoolConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = BufferPoolConfig::default();
        assert!(config.num_io_threads() >= 1);
        assert_eq!(config.capacity_for(PageSize::Size4K), 1024);
    }

    #[test]
    fn builder_overrides_per_page_size_capacity() {
        let config = BufferPoolConfig::builder()
            .capacity(PageSize::Size4K, 256)
            .default_capacity(64)
            .num_io_threads(2)
            .build();
        assert_eq!(config.capacity_for(PageSize::Size4K), 256);
        assert_eq!(config.capacity_for(PageSize::Size8K), 64);
        assert_eq!(config.num_io_threads(), 2);
    }
}
