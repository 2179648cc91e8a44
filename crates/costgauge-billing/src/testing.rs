//! In-memory billing clients for tests

use crate::client::{BillingClient, CostQuery};
use async_trait::async_trait;
use costgauge_common::{Error, Page, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Replays a fixed sequence of responses, recording the tokens it was given
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<Page>>>,
    repeat: Option<Page>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<Page>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with the same page
    pub fn repeating(page: Page) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(page),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.tokens.lock().clone()
    }
}

#[async_trait]
impl BillingClient for ScriptedClient {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_page(&self, _query: &CostQuery, token: Option<&str>) -> Result<Page> {
        self.tokens.lock().push(token.map(str::to_string));
        if let Some(next) = self.script.lock().pop_front() {
            return next;
        }
        match &self.repeat {
            Some(page) => Ok(page.clone()),
            None => Err(Error::Upstream("script exhausted".into())),
        }
    }
}

type Responder = dyn Fn(&CostQuery, Option<&str>) -> Result<Page> + Send + Sync;

/// Answers each call by running a closure over the query
pub struct FnClient {
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl FnClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&CostQuery, Option<&str>) -> Result<Page> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingClient for FnClient {
    fn name(&self) -> &'static str {
        "fn"
    }

    async fn fetch_page(&self, query: &CostQuery, token: Option<&str>) -> Result<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(query, token)
    }
}
