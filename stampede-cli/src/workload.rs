//! Ticket creation against the ticketing API: `POST {base_url}/api/tickets`.
use std::{sync::Arc, time::Duration};

use anyhow::Context;
use rand::{Rng, seq::SliceRandom};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stampede::{IterationResult, VuContext};
use tokio::time::Instant;

const QUEUES: [&str; 4] = ["CAJA", "PERSONAL", "EMPRESAS", "GERENCIA"];

/// The `workload` section of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TicketWorkload {
    pub path: String,
    pub branch_office: String,
    /// National ids are drawn from `[min, max)`.
    pub national_id_min: u64,
    pub national_id_max: u64,
    /// Statuses the status check accepts. Only 201 counts as a created ticket.
    pub accept_statuses: Vec<u16>,
    /// Adds a `response time < ...` check when set.
    #[serde(with = "humantime_serde")]
    pub max_latency: Option<Duration>,
    /// Adds the `has ticket number` and `has position` checks, which must pass
    /// for the iteration to count as a success.
    pub verify_body: bool,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for TicketWorkload {
    fn default() -> Self {
        Self {
            path: "/api/tickets".to_owned(),
            branch_office: "Sucursal Centro".to_owned(),
            national_id_min: 10_000_000,
            national_id_max: 100_000_000,
            accept_statuses: vec![StatusCode::CREATED.as_u16()],
            max_latency: None,
            verify_body: true,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRequest {
    pub national_id: String,
    pub telefono: String,
    pub branch_office: String,
    pub queue_type: &'static str,
}

/// Shared by every virtual user; clones are cheap.
#[derive(Debug, Clone)]
pub struct TicketClient {
    client: Client,
    workload: Arc<TicketWorkload>,
    status_check: Arc<str>,
    latency_check: Option<Arc<str>>,
}

impl TicketClient {
    pub fn new(workload: TicketWorkload) -> anyhow::Result<Self> {
        anyhow::ensure!(
            workload.national_id_min < workload.national_id_max,
            "workload.national_id_min must be below national_id_max"
        );
        let client = Client::builder()
            .timeout(workload.request_timeout)
            .build()
            .context("failed to build the HTTP client")?;

        let statuses: Vec<String> = workload
            .accept_statuses
            .iter()
            .map(u16::to_string)
            .collect();
        let status_check = format!("status is {}", statuses.join(" or ")).into();
        let latency_check = workload
            .max_latency
            .map(|d| format!("response time < {}", humantime::format_duration(d)).into());

        Ok(Self {
            client,
            workload: Arc::new(workload),
            status_check,
            latency_check,
        })
    }

    pub fn request<R: Rng>(&self, rng: &mut R) -> TicketRequest {
        let w = &self.workload;
        TicketRequest {
            national_id: rng.gen_range(w.national_id_min..w.national_id_max).to_string(),
            telefono: format!("+569{}", rng.gen_range(10_000_000..100_000_000)),
            branch_office: w.branch_office.clone(),
            queue_type: QUEUES.choose(rng).copied().unwrap_or(QUEUES[0]),
        }
    }

    /// One iteration: create a ticket and judge the response.
    pub async fn create(&self, ctx: VuContext) -> IterationResult {
        let payload = self.request(&mut rand::thread_rng());
        let url = format!(
            "{}{}",
            ctx.env.base_url.trim_end_matches('/'),
            self.workload.path
        );

        let start = Instant::now();
        let response = self.client.post(&url).json(&payload).send().await;
        let (status, body) = match response {
            Ok(r) => {
                let status = r.status().as_u16();
                (Some(status), r.text().await.unwrap_or_default())
            }
            Err(e) => {
                tracing::warn!("VU {}: request to {url} failed: {e}", ctx.vu_id);
                (None, String::new())
            }
        };
        let latency = start.elapsed();

        let result = self.judge(status, &body, latency);
        if !result.success {
            if let Some(status) = status {
                tracing::warn!("Error: {status} - {body}");
            }
        }
        result
    }

    /// Turn a response into an iteration result with its checks.
    pub fn judge(&self, status: Option<u16>, body: &str, latency: Duration) -> IterationResult {
        let w = &self.workload;
        let created = status == Some(StatusCode::CREATED.as_u16());
        let accepted = status.is_some_and(|s| w.accept_statuses.contains(&s));

        let mut checks = vec![(self.status_check.to_string(), accepted)];
        if let Some(name) = &self.latency_check {
            let fast = status.is_some() && w.max_latency.is_some_and(|max| latency < max);
            checks.push((name.to_string(), fast));
        }
        let mut body_ok = true;
        if w.verify_body {
            let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            let has_number = json.get("numero").is_some_and(|v| !v.is_null());
            let has_position = json
                .get("positionInQueue")
                .and_then(Value::as_f64)
                .is_some_and(|p| p > 0.0);
            checks.push(("has ticket number".to_owned(), has_number));
            checks.push(("has position".to_owned(), has_position));
            body_ok = has_number && has_position;
        }

        let success = created && body_ok;
        IterationResult {
            success,
            latency,
            status,
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn spike() -> TicketWorkload {
        TicketWorkload {
            branch_office: "Sucursal Spike".into(),
            national_id_min: 40_000_000,
            national_id_max: 50_000_000,
            accept_statuses: vec![201, 503],
            max_latency: Some(Duration::from_secs(10)),
            verify_body: false,
            ..TicketWorkload::default()
        }
    }

    #[test]
    fn requests_stay_in_range() {
        let client = TicketClient::new(spike()).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let req = client.request(&mut rng);
            let id: u64 = req.national_id.parse().unwrap();
            assert!((40_000_000..50_000_000).contains(&id));
            assert!(req.telefono.starts_with("+569"));
            assert_eq!(req.telefono.len(), 12);
            assert!(QUEUES.contains(&req.queue_type));
        }

        let json = serde_json::to_value(client.request(&mut rng)).unwrap();
        assert!(json.get("nationalId").is_some());
        assert!(json.get("queueType").is_some());
        assert_eq!(json["branchOffice"], "Sucursal Spike");
    }

    #[test]
    fn full_checks_require_a_ticket_body() {
        let client = TicketClient::new(TicketWorkload::default()).unwrap();
        let ok = client.judge(
            Some(201),
            r#"{"numero":"C01","positionInQueue":3}"#,
            Duration::from_millis(40),
        );
        assert!(ok.success);
        let names: Vec<&str> = ok.checks.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["status is 201", "has ticket number", "has position"]);

        let no_position = client.judge(Some(201), r#"{"numero":"C01"}"#, Duration::ZERO);
        assert!(!no_position.success);
        assert_eq!(no_position.checks[2], ("has position".to_owned(), false));

        let server_error = client.judge(Some(500), "oops", Duration::ZERO);
        assert!(!server_error.success);
        assert!(server_error.checks.iter().all(|(_, passed)| !passed));
    }

    #[test]
    fn spike_checks_accept_503_but_count_only_201() {
        let client = TicketClient::new(spike()).unwrap();

        let busy = client.judge(Some(503), "", Duration::from_secs(1));
        assert!(!busy.success);
        assert_eq!(
            busy.checks,
            vec![
                ("status is 201 or 503".to_owned(), true),
                ("response time < 10s".to_owned(), true),
            ]
        );

        let created = client.judge(Some(201), "", Duration::from_secs(1));
        assert!(created.success);

        let unreachable = client.judge(None, "", Duration::from_secs(11));
        assert!(!unreachable.success);
        assert!(unreachable.checks.iter().all(|(_, passed)| !passed));
    }

    #[test]
    fn empty_id_range_is_rejected() {
        let workload = TicketWorkload {
            national_id_min: 5,
            national_id_max: 5,
            ..TicketWorkload::default()
        };
        assert!(TicketClient::new(workload).is_err());
    }
}
