use async_trait::async_trait;
use log::info;
use serde_json::Value;

use crate::task::{Arguments, BoxError, Outcome, Progress, Task};

/// Says hi, and takes it back when reverted.
pub struct HiTask;

#[async_trait]
impl Task for HiTask {
    async fn execute(&self, _args: &Arguments, _progress: &Progress) -> Result<Value, BoxError> {
        info!("Hi!");
        Ok(Value::Null)
    }

    async fn revert(
        &self,
        _args: &Arguments,
        _outcome: &Outcome,
        _progress: &Progress,
    ) -> Result<(), BoxError> {
        info!("Whooops, said hi too early, take that back!");
        Ok(())
    }
}

/// Says bye, or blows up when asked to.
pub struct ByeTask {
    pub blowup: bool,
}

#[async_trait]
impl Task for ByeTask {
    async fn execute(&self, _args: &Arguments, progress: &Progress) -> Result<Value, BoxError> {
        if self.blowup {
            return Err("Fail!".into());
        }
        progress.update(1.0, None);
        info!("Bye!");
        Ok(Value::Null)
    }
}
