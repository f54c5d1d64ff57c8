use parking_lot::RwLock;

use crate::SentUpdate;

type NewVersionFn = Box<dyn Fn(u64, u64) + Send + Sync>;
type UploadFn = Box<dyn Fn(&SentUpdate) + Send + Sync>;

/// Subscriber registry for engine lifecycle notifications.
///
/// Callbacks run on whichever engine task produced the event, outside the
/// model lock, so they may call back into the engine.
#[derive(Default)]
pub struct EngineEvents {
    new_version: RwLock<Vec<NewVersionFn>>,
    upload: RwLock<Vec<UploadFn>>,
}

impl EngineEvents {
    pub fn on_new_version(&self, callback: impl Fn(u64, u64) + Send + Sync + 'static) {
        self.new_version.write().push(Box::new(callback));
    }

    pub fn on_upload(&self, callback: impl Fn(&SentUpdate) + Send + Sync + 'static) {
        self.upload.write().push(Box::new(callback));
    }

    pub fn emit_new_version(&self, old: u64, new: u64) {
        for callback in self.new_version.read().iter() {
            callback(old, new);
        }
    }

    pub fn emit_upload(&self, update: &SentUpdate) {
        for callback in self.upload.read().iter() {
            callback(update);
        }
    }
}
