//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Common test utilities

// Requires the 'sim' feature

use std::env;
use std::sync::Mutex;
use std::time::Duration;

use lazy_static::lazy_static;
use rand::distributions::{Distribution, Standard};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use fieldrtc::common::SessionConfig;
use fieldrtc::core::call_session::{CallSession, CallTarget};
use fieldrtc::core::endpoint::Endpoint;
use fieldrtc::sim::sim_media::SimMediaBackend;
use fieldrtc::sim::sim_observer::SimObserver;
use fieldrtc::sim::sim_signaling::SimSignaler;

macro_rules! error_line {
    () => {
        concat!(module_path!(), ":", line!())
    };
}

pub struct Prng {
    seed: u64,
    rng: Mutex<Option<ChaCha20Rng>>,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Mutex::new(None),
        }
    }

    // Use a freshly seeded PRNG for each test
    pub fn init(&self) {
        let mut opt = self.rng.lock().unwrap();
        let _ = opt.replace(ChaCha20Rng::seed_from_u64(self.seed));
    }

    pub fn gen<T>(&self) -> T
    where
        Standard: Distribution<T>,
    {
        self.rng.lock().unwrap().as_mut().unwrap().gen::<T>()
    }
}

lazy_static! {
    pub static ref PRNG: Prng = {
        let rand_seed = match env::var("RANDOM_SEED") {
            Ok(v) => v.parse().unwrap(),
            Err(_) => 0,
        };

        println!("\n*** Using random seed: {}", rand_seed);
        Prng::new(rand_seed)
    };
}

pub fn test_init() {
    let _ = env_logger::builder().is_test(true).try_init();
    PRNG.init();
}

/// Short timers so deadline tests finish quickly; long enough that the
/// happy paths never race them.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        ring_timeout: Duration::from_millis(100),
        answer_timeout: Duration::from_millis(400),
        stats_interval: Duration::from_millis(50),
        tick_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

pub fn endpoint(name: &str) -> Endpoint {
    Endpoint::new(
        Some(name.to_string()),
        Some(format!("10.0.0.{}", name.len())),
        5060,
    )
}

pub fn peer_target(contact: &str) -> CallTarget {
    CallTarget::Peer {
        contact: contact.to_string(),
        endpoint: endpoint(contact),
    }
}

pub fn random_contact(prefix: &str) -> String {
    format!("{}-{}", prefix, PRNG.gen::<u16>())
}

/// A session wired to simulation backends, with handles to all of them.
pub struct TestContext {
    pub session: CallSession,
    pub media: SimMediaBackend,
    pub signaler: SimSignaler,
    pub observer: SimObserver,
    pub self_contact: String,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        test_init();
        let media = SimMediaBackend::new();
        let signaler = SimSignaler::new();
        let observer = SimObserver::new();
        let self_contact = random_contact("SELF");
        let session = CallSession::new(
            self_contact.clone(),
            endpoint(&self_contact),
            config,
            Box::new(media.clone()),
            Box::new(signaler.clone()),
            Box::new(observer.clone()),
        )
        .expect(error_line!());
        Self {
            session,
            media,
            signaler,
            observer,
            self_contact,
        }
    }
}
