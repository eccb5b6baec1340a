//! Fake collaborators shared by the runtime integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use certflow_acme::{
  AcmeClient, AcmeClientFactory, AcmeError, CaConfig, ChallengeProvider, ChallengeProviderFactory,
  ChallengeProviderRequest, EabCredentials, IssueRequest, IssuedCertificate, NewRegistration,
};
use certflow_runtime::{
  DeployResult, Deployer, DeployerFactory, DeployerRequest, InspectedCertificate, Inspector,
  Invoker, NodeError, Notifier, RuntimeConfig, RuntimeError, Services,
};
use certflow_store::{AcmeAccount, MemoryStore, RegistrationResource, Repositories, RunLog};
use certflow_workflow::{NodeDef, NodeGraph};
use chrono::{Datelike, TimeDelta, Utc};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

/// Self-signed certificate and key expiring `days` from today.
pub fn certificate_pem(domains: &[&str], days: i64) -> (String, String) {
  let key = rcgen::KeyPair::generate().unwrap();
  let mut params =
    rcgen::CertificateParams::new(domains.iter().map(|d| d.to_string()).collect::<Vec<_>>())
      .unwrap();
  let not_after = Utc::now() + TimeDelta::days(days);
  params.not_before = rcgen::date_time_ymd(2024, 1, 1);
  params.not_after = rcgen::date_time_ymd(
    not_after.year(),
    not_after.month() as u8,
    not_after.day() as u8,
  );
  (params.self_signed(&key).unwrap().pem(), key.serialize_pem())
}

/// ACME client that answers every challenge and issues a 90 day certificate.
#[derive(Default)]
pub struct FakeAcme {
  pub registrations: AtomicUsize,
  pub issued: AtomicUsize,
}

#[async_trait]
impl AcmeClient for FakeAcme {
  async fn register(
    &self,
    email: &str,
    _eab: Option<&EabCredentials>,
  ) -> Result<NewRegistration, AcmeError> {
    self.registrations.fetch_add(1, Ordering::SeqCst);
    Ok(NewRegistration {
      credentials: "{}".to_string(),
      resource: RegistrationResource {
        uri: format!("https://acme.test/acct/{email}"),
        body: json!({ "status": "valid" }),
      },
    })
  }

  async fn issue(
    &self,
    account: &AcmeAccount,
    request: &IssueRequest,
    challenge: &dyn ChallengeProvider,
  ) -> Result<IssuedCertificate, AcmeError> {
    for domain in &request.domains {
      challenge.present(domain, "token", "token.thumb").await?;
      challenge.cleanup(domain, "token", "token.thumb").await?;
    }
    self.issued.fetch_add(1, Ordering::SeqCst);

    let domains: Vec<&str> = request.domains.iter().map(String::as_str).collect();
    let (certificate, private_key) = certificate_pem(&domains, 90);
    let (issuer_certificate, _) = certificate_pem(&["issuer.test"], 365);
    Ok(IssuedCertificate {
      certificate,
      private_key,
      issuer_certificate,
      account_url: account.resource.uri.clone(),
      certificate_url: None,
    })
  }
}

pub struct FakeAcmeFactory(pub Arc<FakeAcme>);

impl AcmeClientFactory for FakeAcmeFactory {
  fn client(&self, _ca: &CaConfig) -> Result<Arc<dyn AcmeClient>, AcmeError> {
    Ok(self.0.clone())
  }
}

/// Challenge provider factory counting every DNS operation.
#[derive(Default)]
pub struct CountingChallenges {
  pub requests: AtomicUsize,
  pub presented: Arc<AtomicUsize>,
}

struct CountingChallenge {
  presented: Arc<AtomicUsize>,
}

#[async_trait]
impl ChallengeProvider for CountingChallenge {
  async fn present(&self, _domain: &str, _token: &str, _key_auth: &str) -> Result<(), AcmeError> {
    self.presented.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn cleanup(&self, _domain: &str, _token: &str, _key_auth: &str) -> Result<(), AcmeError> {
    Ok(())
  }
}

impl ChallengeProviderFactory for CountingChallenges {
  fn provider(
    &self,
    _request: &ChallengeProviderRequest,
  ) -> Result<Arc<dyn ChallengeProvider>, AcmeError> {
    self.requests.fetch_add(1, Ordering::SeqCst);
    Ok(Arc::new(CountingChallenge {
      presented: self.presented.clone(),
    }))
  }
}

/// Deployer recording every deployed chain.
#[derive(Default)]
pub struct RecordingDeployer {
  pub deployed: Mutex<Vec<String>>,
}

#[async_trait]
impl Deployer for RecordingDeployer {
  async fn deploy(
    &self,
    _cancel: &CancellationToken,
    cert_pem: &str,
    _key_pem: &str,
  ) -> Result<DeployResult, NodeError> {
    self.deployed.lock().unwrap().push(cert_pem.to_string());
    let mut details = Map::new();
    details.insert("target".to_string(), Value::from("local"));
    Ok(DeployResult { details })
  }
}

pub struct RecordingDeployers(pub Arc<RecordingDeployer>);

impl DeployerFactory for RecordingDeployers {
  fn deployer(&self, _request: &DeployerRequest) -> Result<Arc<dyn Deployer>, NodeError> {
    Ok(self.0.clone())
  }
}

/// Notifier recording subjects. The `broken` channel always fails.
#[derive(Default)]
pub struct RecordingNotifier {
  pub sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
  pub fn sent(&self) -> Vec<String> {
    self.sent.lock().unwrap().clone()
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn send(
    &self,
    channel: &str,
    subject: &str,
    _message: &str,
    _channel_config: &Map<String, Value>,
  ) -> Result<(), NodeError> {
    if channel == "broken" {
      return Err(NodeError::provider(channel, "channel unavailable"));
    }
    self.sent.lock().unwrap().push(subject.to_string());
    Ok(())
  }
}

/// Inspector reporting a valid certificate with a fixed remaining lifetime.
pub struct FixedInspector {
  pub days_left: i64,
}

#[async_trait]
impl Inspector for FixedInspector {
  async fn inspect(
    &self,
    _host: &str,
    _port: u16,
    domain: &str,
  ) -> Result<InspectedCertificate, NodeError> {
    Ok(InspectedCertificate {
      subject_alt_names: vec![domain.to_string()],
      issuer_org: "Fake CA".to_string(),
      not_before: Utc::now() - TimeDelta::days(30),
      // Extra hour keeps num_days() at days_left while the test runs.
      not_after: Utc::now() + TimeDelta::days(self.days_left) + TimeDelta::hours(1),
      validated: true,
    })
  }
}

pub struct Harness {
  pub store: Arc<MemoryStore>,
  pub services: Arc<Services>,
  pub acme: Arc<FakeAcme>,
  pub challenges: Arc<CountingChallenges>,
  pub deployer: Arc<RecordingDeployer>,
  pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_inspected_days(30)
  }

  pub fn with_inspected_days(days_left: i64) -> Self {
    let store = Arc::new(MemoryStore::new());
    let acme = Arc::new(FakeAcme::default());
    let challenges = Arc::new(CountingChallenges::default());
    let deployer = Arc::new(RecordingDeployer::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let services = Services::new(
      Repositories::from_store(store.clone()),
      Arc::new(FakeAcmeFactory(acme.clone())),
      challenges.clone(),
      Arc::new(RecordingDeployers(deployer.clone())),
      notifier.clone(),
      Arc::new(FixedInspector { days_left }),
    );

    Self {
      store,
      services: Arc::new(services),
      acme,
      challenges,
      deployer,
      notifier,
    }
  }

  pub async fn run(&self, def: &NodeDef) -> (Result<(), RuntimeError>, Vec<RunLog>) {
    self
      .run_with(def, RuntimeConfig::default(), &CancellationToken::new())
      .await
  }

  pub async fn run_with(
    &self,
    def: &NodeDef,
    config: RuntimeConfig,
    cancel: &CancellationToken,
  ) -> (Result<(), RuntimeError>, Vec<RunLog>) {
    let graph = NodeGraph::from_def(def).unwrap();
    let mut invoker = Invoker::new(self.services.clone(), config, "wf-1", "run-1");
    let result = invoker.invoke(&graph, cancel).await;
    (result, invoker.logs().to_vec())
  }
}

/// A notify node sending `subject` over `channel`.
pub fn notify(id: &str, channel: &str, subject: &str) -> NodeDef {
  NodeDef::new(id, certflow_workflow::NodeType::Notify).with_config(json!({
    "channel": channel,
    "subject": subject,
    "message": "body",
    "channelConfig": {},
  }))
}

/// Ids of the nodes that left a log entry, in order.
pub fn visited(logs: &[RunLog]) -> Vec<&str> {
  logs.iter().map(|log| log.node_id.as_str()).collect()
}
