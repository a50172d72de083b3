//! Server-side query control object

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use scopes_rpc::{AdapterBinding, Current, DispatchFuture, Servant};
use tracing::debug;

use super::op;
use super::query_object::QueryObject;

/// Remote handle a client uses to cancel a query. `cancel` and `destroy`
/// exclude each other; whichever comes first removes the object from its
/// adapter.
#[derive(Default)]
pub struct QueryCtrlObject {
    destroyed: AtomicBool,
    query: Mutex<Weak<QueryObject>>,
    binding: Mutex<Option<AdapterBinding>>,
}

impl QueryCtrlObject {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_query(&self, query: &Arc<QueryObject>) {
        *self.query.lock() = Arc::downgrade(query);
    }

    pub fn set_binding(&self, binding: AdapterBinding) {
        *self.binding.lock() = Some(binding);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        let binding = self.binding.lock().take();
        if let Some(binding) = binding {
            binding.disconnect();
        }
    }

    pub fn cancel(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect();
        let query = self.query.lock().upgrade();
        match query {
            Some(query) => query.cancel(),
            None => debug!("QueryCtrlObject: cancel for a query that already went away"),
        }
    }

    /// The query finished on its own
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect();
    }

    async fn serve(self: Arc<Self>, current: Current) -> scopes_rpc::Result<Bytes> {
        match current.op_name.as_str() {
            op::CANCEL => {
                // the cancelled() hook is user code
                tokio::task::spawn_blocking(move || self.cancel()).await?;
            }
            op::DESTROY => self.destroy(),
            _ => return Err(current.operation_not_exist()),
        }
        Ok(Bytes::new())
    }
}

impl Servant for QueryCtrlObject {
    fn dispatch(self: Arc<Self>, current: Current, _payload: Bytes) -> DispatchFuture {
        Box::pin(self.serve(current))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::base::{QueryBase, QueryHandle, SearchQueryBase};
    use crate::error::BoxError;
    use crate::reply::SearchReply;
    use scopes_rpc::{Invoker, InvokerConfig, RequestMode};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Idle {
        cancels: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl QueryBase for Idle {
        fn cancelled(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SearchQueryBase for Idle {
        fn run(&self, _reply: SearchReply, _token: CancellationToken) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn current(op_name: &str) -> Current {
        Current {
            identity: "ctrl".to_string(),
            category: String::new(),
            op_name: op_name.to_string(),
            mode: RequestMode::Oneway,
            adapter_name: "test-c".to_string(),
            endpoint: "ipc:///tmp/test-c".to_string(),
        }
    }

    fn query(cancels: &Arc<std::sync::atomic::AtomicUsize>) -> Arc<QueryObject> {
        let invoker = Invoker::new(InvokerConfig::default(), None).unwrap();
        let idle = Idle {
            cancels: cancels.clone(),
        };
        QueryObject::new(
            QueryHandle::Search(Box::new(idle)),
            0,
            None,
            invoker,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_cancel_reaches_query_once() {
        let cancels = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let qo = query(&cancels);
        let ctrl = QueryCtrlObject::new();
        ctrl.set_query(&qo);

        ctrl.clone().dispatch(current(op::CANCEL), Bytes::new()).await.unwrap();
        ctrl.clone().dispatch(current(op::CANCEL), Bytes::new()).await.unwrap();
        ctrl.clone().dispatch(current(op::DESTROY), Bytes::new()).await.unwrap();

        assert!(ctrl.is_destroyed());
        assert!(qo.is_cancelled());
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_destroy_excludes_cancel() {
        let cancels = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let qo = query(&cancels);
        let ctrl = QueryCtrlObject::new();
        ctrl.set_query(&qo);

        ctrl.destroy();
        ctrl.cancel();
        assert!(!qo.is_cancelled());
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let ctrl = QueryCtrlObject::new();
        assert!(ctrl.dispatch(current("frob"), Bytes::new()).await.is_err());
    }
}
