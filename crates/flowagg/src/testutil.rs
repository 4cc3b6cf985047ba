//! Deterministic synthetic flow generator, built only for tests (mirrors an
//! out-of-scope generator in the origin this aggregator's data model was
//! modeled on). Every knob is seeded so a given seed always reproduces the
//! same sequence of flows.

use std::net::IpAddr;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::flow::{Direction, Exporter, FlowRecord};

pub struct FlowGenerator {
    rng: ChaCha8Rng,
    exporters: Vec<Exporter>,
    applications: Vec<&'static str>,
}

impl FlowGenerator {
    pub fn new(seed: u64) -> Self {
        FlowGenerator {
            rng: ChaCha8Rng::seed_from_u64(seed),
            exporters: vec![
                Exporter {
                    foreign_source: "Routers".into(),
                    foreign_id: "edge-1".into(),
                    node_id: 1,
                    location: "Default".into(),
                    categories: vec!["edge".into()],
                },
                Exporter {
                    foreign_source: "Routers".into(),
                    foreign_id: "edge-2".into(),
                    node_id: 2,
                    location: "Default".into(),
                    categories: vec!["edge".into()],
                },
            ],
            applications: vec!["HTTP", "HTTPS", "DNS", "SSH", ""],
        }
    }

    fn random_address(&mut self) -> IpAddr {
        let octets: [u8; 4] = [
            10,
            self.rng.gen_range(0..=5),
            self.rng.gen_range(0..=255),
            self.rng.gen_range(1..=254),
        ];
        IpAddr::from(octets)
    }

    /// Generate one flow record active somewhere within
    /// `[base_time_ms, base_time_ms + spread_ms]`, with a duration up to
    /// `max_duration_ms` (can be zero, producing an instantaneous flow).
    pub fn next_flow(&mut self, base_time_ms: i64, spread_ms: i64, max_duration_ms: i64) -> FlowRecord {
        let exporter = self.exporters[self.rng.gen_range(0..self.exporters.len())].clone();
        let application = self.applications[self.rng.gen_range(0..self.applications.len())];
        let direction = if self.rng.gen_bool(0.5) {
            Direction::Ingress
        } else {
            Direction::Egress
        };

        let delta = base_time_ms + self.rng.gen_range(0..=spread_ms.max(1));
        let duration = self.rng.gen_range(0..=max_duration_ms.max(0));
        let last = delta + duration;

        FlowRecord {
            exporter,
            input_snmp: self.rng.gen_range(1..=4),
            output_snmp: self.rng.gen_range(1..=4),
            src_address: self.random_address(),
            dst_address: self.random_address(),
            src_port: self.rng.gen_range(1024..=65535),
            dst_port: self.rng.gen_range(1..=1024),
            protocol: if self.rng.gen_bool(0.9) { 6 } else { 17 },
            application: application.to_string(),
            num_bytes: self.rng.gen_range(1..=1_000_000),
            first_switched_ms: delta,
            delta_switched_ms: Some(delta),
            last_switched_ms: last,
            direction,
        }
    }

    pub fn next_batch(&mut self, count: usize, base_time_ms: i64, spread_ms: i64, max_duration_ms: i64) -> Vec<FlowRecord> {
        (0..count)
            .map(|_| self.next_flow(base_time_ms, spread_ms, max_duration_ms))
            .collect()
    }
}
