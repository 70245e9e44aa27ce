// Test mocks for outreach.
//
// MockChannel answers sends from a per-handle script and records every send.
// StaticLeadSource hands out the same candidates every cycle, or fails/panics
// on request.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use leadsignal_common::{render_signals, Candidate, ContentItem, Lead, MatchedSignal};

use crate::channel::{ChannelError, ContactChannel};
use crate::lead_source::LeadSource;

/// Build a candidate with one matched signal and the given priority.
pub fn candidate(handle: &str, locator: &str, priority: i64) -> Candidate {
    let item = ContentItem {
        locator: locator.to_string(),
        author: handle.to_string(),
        title: format!("Post by {handle}"),
        body: String::new(),
        created_at: Utc::now(),
        channel: "forhire".to_string(),
    };
    let signals = vec![MatchedSignal {
        class: "hire".to_string(),
        matches: vec!["developer".to_string()],
    }];
    Candidate {
        lead: Lead {
            key: item.key(),
            category: "dev-gig".to_string(),
            matched_signal: render_signals(&signals),
            signals,
            priority,
        },
        item,
    }
}

/// One scripted reply for a send.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Fail(ChannelError),
    /// Never answer within any reasonable send timeout.
    Hang,
}

/// A send the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub handle: String,
    pub subject: String,
    pub body: String,
}

/// Scripted contact channel. Replies are consumed per handle in order; once a
/// handle's script runs out (or it has none) the last reply repeats, and an
/// unscripted handle succeeds.
/// Builder pattern: `.on_send()`, `.on_send_sequence()`.
#[derive(Default)]
pub struct MockChannel {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    sticky: Mutex<HashMap<String, Reply>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `handle` gets `reply`.
    pub fn on_send(self, handle: &str, reply: Reply) -> Self {
        self.on_send_sequence(handle, vec![reply])
    }

    /// Sends to `handle` get `replies` in order; the last one repeats.
    pub fn on_send_sequence(self, handle: &str, replies: Vec<Reply>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(handle.to_string(), replies.into());
        }
        self
    }

    /// Every send received so far, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Handles sent to so far, in order.
    pub fn sent_handles(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.handle).collect()
    }

    fn next_reply(&self, handle: &str) -> Reply {
        let scripted = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(handle).and_then(|q| q.pop_front()));
        let Ok(mut sticky) = self.sticky.lock() else {
            return Reply::Ok;
        };
        match scripted {
            Some(reply) => {
                sticky.insert(handle.to_string(), reply.clone());
                reply
            }
            None => sticky.get(handle).cloned().unwrap_or(Reply::Ok),
        }
    }
}

#[async_trait]
impl ContactChannel for MockChannel {
    async fn send(&self, handle: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMessage {
                handle: handle.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        }
        match self.next_reply(handle) {
            Reply::Ok => Ok(()),
            Reply::Fail(e) => Err(e),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Ok(())
            }
        }
    }
}

/// What a [`StaticLeadSource`] does on a given cycle.
#[derive(Debug, Clone)]
pub enum LoadBehavior {
    Fail,
    Panic,
}

/// Returns the same candidates on every call. Specific calls (1-based) can be
/// made to fail or panic with `.on_call()`.
#[derive(Default)]
pub struct StaticLeadSource {
    candidates: Vec<Candidate>,
    behaviors: HashMap<u32, LoadBehavior>,
    calls: AtomicU32,
}

impl StaticLeadSource {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }

    pub fn on_call(mut self, call: u32, behavior: LoadBehavior) -> Self {
        self.behaviors.insert(call, behavior);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeadSource for StaticLeadSource {
    async fn candidates(&self) -> Result<Vec<Candidate>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.behaviors.get(&call) {
            Some(LoadBehavior::Fail) => bail!("StaticLeadSource: load {call} failing"),
            Some(LoadBehavior::Panic) => panic!("StaticLeadSource: load {call} panicking"),
            None => Ok(self.candidates.clone()),
        }
    }
}
