use std::collections::HashMap;
use std::net::IpAddr;

use crate::connection::L7Protocol;
use crate::tuple::Direction;

use super::{dns_wire, http, tls, DpiEngine, DpiEvent, DpiExtract, FlowId};

/// Payload bytes accumulated per flow before giving up on TLS/HTTP detection; bounds
/// memory the same way the real DPI engine bounds its own per-flow reassembly buffers.
const MAX_REASSEMBLY: usize = 4096;

#[derive(Default)]
struct FlowState {
    packet_count: u32,
    app: Option<String>,
    master: Option<String>,
    info: Option<String>,
    url: Option<String>,
    dns_answer: Option<(String, IpAddr)>,
    reassembly: Vec<u8>,
}

/// The in-tree stand-in for the real DPI library: a small set of hand-rolled
/// protocol sniffers (DNS, TLS, HTTP) driven by [`super::Driver`].
#[derive(Default)]
pub struct HeuristicDpi {
    flows: HashMap<FlowId, FlowState>,
    next_id: u64,
}

impl HeuristicDpi {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_dns(state: &mut FlowState, payload: &[u8]) -> bool {
        let Some(header) = dns_wire::parse_header(payload) else {
            return false;
        };

        state.app = Some("DNS".to_string());

        if header.is_query() {
            if let Some((question, _)) = dns_wire::parse_question(payload) {
                if question.name.contains('.') {
                    state.info = Some(question.name);
                }
            }
            return true;
        }

        let Some((question, after_question)) = dns_wire::parse_question(payload) else {
            return true;
        };
        if question.name.contains('.') {
            state.info = Some(question.name.clone());
        }

        let answers = dns_wire::parse_answers(payload, after_question, header.ancount);
        if let Some(addr) = answers.iter().filter_map(|a| a.addr).find(dns_wire::is_cacheable) {
            state.dns_answer = Some((question.name, addr));
        }

        true
    }

    fn try_tls(state: &mut FlowState, payload: &[u8], dir: Direction) -> bool {
        if dir != Direction::Outbound {
            return false;
        }
        if state.reassembly.len() < MAX_REASSEMBLY {
            state.reassembly.extend_from_slice(payload);
            state.reassembly.truncate(MAX_REASSEMBLY);
        }

        match tls::parse_client_hello_sni(&state.reassembly) {
            Some(sni) => {
                state.app = Some("TLS".to_string());
                state.info = Some(sni);
                true
            }
            None => false,
        }
    }

    fn try_http(state: &mut FlowState, payload: &[u8], dir: Direction) -> bool {
        if dir != Direction::Outbound {
            return false;
        }
        if state.reassembly.len() < MAX_REASSEMBLY {
            state.reassembly.extend_from_slice(payload);
            state.reassembly.truncate(MAX_REASSEMBLY);
        }

        match http::parse_request(&state.reassembly) {
            Some(req) => {
                state.app = Some("HTTP".to_string());
                state.url = Some(http::build_url(&req.host, &req.path));
                state.info = Some(req.host);
                true
            }
            None => false,
        }
    }
}

impl DpiEngine for HeuristicDpi {
    fn new_flow(&mut self) -> FlowId {
        let id = self.next_id;
        self.next_id += 1;
        self.flows.insert(id, FlowState::default());
        id
    }

    fn handle_packet(&mut self, flow: FlowId, payload: &[u8], dir: Direction, _ts_micros: u64) -> DpiEvent {
        let Some(state) = self.flows.get_mut(&flow) else {
            return DpiEvent::Pending;
        };
        state.packet_count += 1;

        if state.app.is_none() {
            let _ = Self::try_dns(state, payload)
                || Self::try_tls(state, payload, dir)
                || Self::try_http(state, payload, dir);
        }

        match &state.app {
            Some(app) => DpiEvent::Confident(app.clone()),
            None => DpiEvent::Pending,
        }
    }

    fn packet_count(&self, flow: FlowId) -> u32 {
        self.flows.get(&flow).map(|s| s.packet_count).unwrap_or(0)
    }

    fn give_up(&mut self, flow: FlowId) -> L7Protocol {
        let state = self.flows.get(&flow);
        let mut l7 = L7Protocol {
            app: state.and_then(|s| s.app.clone()),
            master: state.and_then(|s| s.master.clone()),
        };
        l7.finalize();
        l7
    }

    fn extract(&self, flow: FlowId) -> DpiExtract {
        let Some(state) = self.flows.get(&flow) else {
            return DpiExtract::default();
        };

        DpiExtract {
            info: state.info.clone(),
            url: state.url.clone(),
            dns_answer: state.dns_answer.clone(),
        }
    }

    fn free(&mut self, flow: FlowId) {
        self.flows.remove(&flow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dns_query(name: &str) -> Vec<u8> {
        let mut buf = vec![0u8; dns_wire::HEADER_LEN];
        buf[5] = 1;
        for label in name.split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(&[0, 1, 0, 1]);
        buf
    }

    #[test]
    fn s1_dns_query_is_classified_on_first_packet() {
        let mut dpi = HeuristicDpi::new();
        let flow = dpi.new_flow();

        let event = dpi.handle_packet(flow, &dns_query("example.com"), Direction::Outbound, 0);
        assert!(matches!(event, DpiEvent::Confident(ref p) if p == "DNS"));

        let l7 = dpi.give_up(flow);
        assert_eq!(l7.master.as_deref(), Some("DNS"));

        let extract = dpi.extract(flow);
        assert_eq!(extract.info.as_deref(), Some("example.com"));
    }

    #[test]
    fn unrecognized_payload_stays_pending() {
        let mut dpi = HeuristicDpi::new();
        let flow = dpi.new_flow();

        let event = dpi.handle_packet(flow, &[1, 2, 3, 4], Direction::Outbound, 0);
        assert!(matches!(event, DpiEvent::Pending));
    }

    #[test]
    fn free_drops_flow_state() {
        let mut dpi = HeuristicDpi::new();
        let flow = dpi.new_flow();
        dpi.handle_packet(flow, &dns_query("example.com"), Direction::Outbound, 0);
        dpi.free(flow);

        let extract = dpi.extract(flow);
        assert!(extract.info.is_none());
    }
}
