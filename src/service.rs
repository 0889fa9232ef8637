//! Async facade over the graph engines.
//!
//! Store work is synchronous, so every call runs on the blocking pool with
//! the configured request timeout. When the timeout fires the request's
//! cancel flag is raised and the worker stops at its next store round-trip.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::callgraph::Callgraph;
use crate::config::TiServiceConfig;
use crate::context::{Clock, RequestContext, SystemClock};
use crate::error::{Result, TiError};
use crate::graph::{BranchMerger, GraphStore, PartialUploader, TestSelector, VisGraphBuilder};
use crate::types::{
    GetVgReq, GetVgResp, MergePartialCgRequest, Scope, SelectTestsReq, SelectTestsResp, VcsInfo,
};

#[derive(Clone)]
pub struct TiService {
    store: Arc<Mutex<GraphStore>>,
    config: Arc<TiServiceConfig>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TiService {
    /// Open the store named in `config`.
    pub fn open(config: TiServiceConfig) -> Result<Self> {
        let store = GraphStore::new(&config.store.path)?;
        tracing::info!(path = %config.store.path, "opened callgraph store");
        Ok(Self::new(store, config))
    }

    pub fn new(store: GraphStore, config: TiServiceConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TiServiceConfig {
        &self.config
    }

    pub async fn upload_partial_cg(
        &self,
        cg: Callgraph,
        vcs: VcsInfo,
        scope: Scope,
        target_branch: String,
    ) -> Result<SelectTestsResp> {
        self.run("upload", move |store, ctx, _| {
            PartialUploader::new(store, ctx).upload(&cg, &vcs, &scope, &target_branch)
        })
        .await
    }

    pub async fn merge_partial_cg(&self, req: MergePartialCgRequest) -> Result<()> {
        self.run("merge", move |store, ctx, _| BranchMerger::new(store, ctx).merge(&req))
            .await
    }

    /// `enable_reflection` overrides `selection.enable_reflection` for this
    /// call when set.
    pub async fn select_tests(
        &self,
        req: SelectTestsReq,
        account: String,
        enable_reflection: Option<bool>,
    ) -> Result<SelectTestsResp> {
        self.run("select", move |store, ctx, config| {
            TestSelector::new(store, ctx, &config.selection)
                .with_reflection(enable_reflection)
                .select(&req, &account)
        })
        .await
    }

    pub async fn get_vg(&self, req: GetVgReq) -> Result<GetVgResp> {
        self.run("visualize", move |store, ctx, config| {
            VisGraphBuilder::new(store, ctx, &config.visualization).build(&req)
        })
        .await
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&GraphStore, &RequestContext, &TiServiceConfig) -> Result<T> + Send + 'static,
    {
        let timeout = self.config.request_timeout();
        let ctx = RequestContext::new(self.clock.clone()).with_timeout(timeout);
        let worker_ctx = ctx.clone();
        let store = self.store.clone();
        let config = self.config.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let guard = store.blocking_lock();
            f(&*guard, &worker_ctx, &config)
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(TiError::Task(format!("{op}: {join}"))),
            Err(_) => {
                ctx.cancel();
                tracing::warn!(op, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(TiError::Cancelled {
                    stage: op.to_string(),
                })
            }
        }
    }
}
