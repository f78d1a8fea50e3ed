use loopbridge::log::LogLevel;
use loopbridge::{
    BodyBuf, BodyRead, Engine, EngineError, OutChunk, PeerSelection, ReqId, SubToken,
    SubrequestArgs,
};
use std::sync::{Arc, Condvar, Mutex};

/// Simple channel for sending and waiting for notification events.
/// Returns (send, recv) closures.
#[allow(clippy::mutex_atomic)]
pub fn notify_channel() -> (impl Fn() + Send + Sync, impl FnMut() + Send + Sync) {
    let pair1 = Arc::new((Mutex::new(0_usize), Condvar::new()));
    let pair2 = pair1.clone();
    let mut count = 0;
    (
        move || {
            let mut lock = pair1.0.lock().unwrap();
            *lock = lock.wrapping_add(1);
            pair1.1.notify_one();
        },
        move || {
            let mut lock = pair2.0.lock().unwrap();
            while *lock == count {
                lock = pair2.1.wait(lock).unwrap();
            }
            count = *lock;
        },
    )
}

/// Engine with no requests.  Only the task bridge is exercised, so
/// every request-related call is unreachable.
pub struct NullEngine;

impl Engine for NullEngine {
    fn log(&self, level: LogLevel, msg: &str) {
        eprintln!("{}: {}", level, msg);
    }
    fn location_id(&self, _: ReqId) -> Option<u64> {
        None
    }
    fn method(&self, _: ReqId) -> u32 {
        0
    }
    fn uri(&self, _: ReqId) -> &[u8] {
        b"/"
    }
    fn args(&self, _: ReqId) -> Option<&[u8]> {
        None
    }
    fn visit_headers(&self, _: ReqId, _: &mut dyn FnMut(&[u8], &[u8])) {}
    fn read_body(&mut self, _: ReqId) -> BodyRead {
        BodyRead::Complete
    }
    fn visit_body(&self, _: ReqId, _: &mut dyn FnMut(BodyBuf<'_>)) {}
    fn main_of(&self, req: ReqId) -> ReqId {
        req
    }
    fn set_status(&mut self, _: ReqId, _: u16) {}
    fn add_header_out(&mut self, _: ReqId, _: &str, _: &str) -> Result<(), EngineError> {
        Ok(())
    }
    fn set_content_length(&mut self, _: ReqId, _: u64) {}
    fn set_header_only(&mut self, _: ReqId) {}
    fn send_header(&mut self, _: ReqId) -> Result<(), EngineError> {
        Ok(())
    }
    fn output(&mut self, _: ReqId, _: OutChunk) -> Result<(), EngineError> {
        Ok(())
    }
    fn finalize(&mut self, _: ReqId, _: i32) {}
    fn subrequest(
        &mut self,
        _: ReqId,
        _: SubrequestArgs,
        _: SubToken,
    ) -> Result<ReqId, EngineError> {
        Err(EngineError(-1))
    }
    fn new_anchor(&mut self, _: u64) -> Result<ReqId, EngineError> {
        Err(EngineError(-1))
    }
    fn run_posted(&mut self, _: ReqId) {}
    fn set_peer(&mut self, _: ReqId, _: &PeerSelection) -> Result<(), EngineError> {
        Ok(())
    }
}
