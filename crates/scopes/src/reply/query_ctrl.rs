//! Client-side query control

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::reply_object::ReplyObject;
use crate::proxies::QueryCtrlProxy;
use crate::types::CompletionDetails;

/// Handle returned to a client for one outstanding query.
///
/// The control proxy of the remote query arrives after the call that
/// created the query returns. A cancel issued before then is remembered
/// and forwarded as soon as the proxy is known.
pub struct QueryCtrl {
    proxy: Mutex<Option<QueryCtrlProxy>>,
    cancel_requested: AtomicBool,
    reply: Weak<ReplyObject>,
}

impl QueryCtrl {
    pub fn new(reply: &Arc<ReplyObject>) -> Arc<Self> {
        Arc::new(Self {
            proxy: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
            reply: Arc::downgrade(reply),
        })
    }

    pub(crate) fn set_proxy(&self, proxy: QueryCtrlProxy) {
        let mut slot = self.proxy.lock();
        if self.cancel_requested.load(Ordering::SeqCst) {
            debug!("QueryCtrl: forwarding deferred cancel to {}", proxy);
            if let Err(e) = proxy.cancel() {
                warn!("QueryCtrl: cancel failed: {}", e);
            }
        }
        *slot = Some(proxy);
    }

    pub fn proxy(&self) -> Option<QueryCtrlProxy> {
        self.proxy.lock().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Cancel the query. The listener receives `finished(Cancelled)` right
    /// away unless the query already finished; later pushes are discarded.
    pub fn cancel(&self) {
        {
            let slot = self.proxy.lock();
            if self.cancel_requested.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(proxy) = slot.as_ref() {
                if let Err(e) = proxy.cancel() {
                    warn!("QueryCtrl: cancel failed: {}", e);
                }
            }
        }
        if let Some(reply) = self.reply.upgrade() {
            reply.finished(CompletionDetails::cancelled());
        }
    }
}
