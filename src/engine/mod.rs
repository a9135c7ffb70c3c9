//! Asynchronous execution engine
//!
//! A [`WorkerContext`] belongs to one thread. The harness drives it with
//! [`WorkerContext::submit`] until it reports [`SubmitStatus::Busy`], then
//! collects finished units with [`WorkerContext::harvest`].

mod harvest;
mod slot;
mod submit;
pub mod work_unit;
mod worker;

pub use submit::SubmitStatus;
pub use work_unit::{Direction, WorkUnit};
pub use worker::{WorkerContext, WorkerTeardown};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::backend::MemBackend;
    use crate::config::EngineOptions;
    use crate::session::SessionManager;

    pub const POOL: u128 = 0x0c4f_9d2a_71e3_4b0e_8f6a_1d3b_5e7c_9a01;
    pub const CONT: u128 = 0x5b8e_2c1d_4a6f_4e9b_a3d7_0f1e_2c4b_6d02;

    pub fn session_with(backend: MemBackend) -> Arc<SessionManager<MemBackend>> {
        let backend =
            backend.with_container(Uuid::from_u128(POOL), vec![0, 1], Uuid::from_u128(CONT));
        Arc::new(SessionManager::new(Arc::new(backend)))
    }

    pub fn session() -> Arc<SessionManager<MemBackend>> {
        session_with(MemBackend::with_seed(7))
    }

    pub fn options() -> EngineOptions {
        EngineOptions::new(
            &Uuid::from_u128(POOL).to_string(),
            &Uuid::from_u128(CONT).to_string(),
            "0:1",
        )
    }
}
