pub mod pool;

pub use pool::{
    PoolMapper,
    InMemoryMapper,
    FileMapper,
    MemoryPool,
    MemoryPoolSet,
    RequestPools,
};
