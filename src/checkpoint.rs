use crate::database::BlockStore;
use crate::error::Result;

/// Derives where loading resumes. Holds no state of its own: the store is the only
/// record of progress.
#[derive(Clone, Copy, Debug)]
pub struct Checkpoint {
    start_height: u64,
}

impl Checkpoint {
    pub fn new(start_height: u64) -> Self {
        Self { start_height }
    }

    pub async fn highest_loaded_height<S: BlockStore>(&self, store: &S) -> Result<Option<u64>> {
        store.highest_loaded_height().await
    }

    pub fn next_target(&self, highest: Option<u64>) -> u64 {
        match highest {
            Some(highest) => highest + 1,
            None => self.start_height,
        }
    }

    /// The height to load next, or `None` when the store already reaches the tip.
    pub fn plan(&self, tip: u64, highest: Option<u64>) -> Option<u64> {
        let target = self.next_target(highest);
        (target <= tip).then_some(target)
    }
}
