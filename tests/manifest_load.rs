use std::io::Write;

use cloud_deploy::manifest::{
    CredentialSource, EnvironmentType, HealthCheckType, Manifest, ProviderName,
};

const AWS_FULL: &str = r#"
version: "1"
application:
  name: my-app
environment:
  name: my-app-env
  cname: my-app
image: "my-app:latest"
provider:
  name: aws
  region: us-east-2
  credentials:
    source: vault
deployment:
  platform: docker
instance:
  type: t3.micro
  environment_type: LoadBalanced
health_check:
  type: enhanced
  path: /health
monitoring:
  enhanced_health: true
  cloudwatch_metrics: true
  cloudwatch_logs:
    enabled: true
    retention_days: 30
    stream_logs: true
vault:
  address: "https://vault.internal:8200"
  auth:
    method: approle
    role_id: deployer
    secret_id: shh
  tls_skip_verify: false
secrets:
  - name: DATABASE_URL
    vault_path: secret/data/myapp/database
    vault_key: url
environment_variables:
  LOG_LEVEL: info
tags:
  team: platform
iam:
  instance_profile: eb-ec2-role
  service_role: eb-service-role
ssl:
  certificate_arn: arn:aws:acm:us-east-2:123456789012:certificate/abc
"#;

const GCP_SEED: &str = r#"
application:
  name: my-app
environment:
  name: my-app-env
image: "my-app:latest"
provider:
  name: gcp
  region: us-central1
  project_id: new-proj
  billing_account_id: "XXXXXX-XXXXXX-XXXXXX"
  credentials:
    source: manifest
    service_account_key_json: '{"type":"service_account","client_email":"d@p.iam"}'
cloud_run:
  cpu: "1"
  memory: 512Mi
  max_instances: 100
"#;

#[test]
fn loads_full_aws_manifest() {
    let manifest = Manifest::load(AWS_FULL.as_bytes()).expect("loads");
    assert_eq!(manifest.provider.name, ProviderName::Aws);
    assert_eq!(manifest.provider.credentials.source, CredentialSource::Vault);
    assert_eq!(manifest.environment.cname.as_deref(), Some("my-app"));
    assert_eq!(manifest.instance.environment_type, EnvironmentType::LoadBalanced);
    assert_eq!(manifest.health_check.check_type, HealthCheckType::Enhanced);
    assert!(manifest.enhanced_health());
    assert_eq!(manifest.monitoring.cloudwatch_logs.retention_days, 30);
    assert_eq!(manifest.secrets.len(), 1);
    assert_eq!(manifest.secrets[0].vault_path, "secret/data/myapp/database");
    assert_eq!(
        manifest.vault.as_ref().map(|v| v.auth.method.as_str()),
        Some("approle")
    );
    assert_eq!(
        manifest.ssl.as_ref().map(|s| s.certificate_arn.as_str()),
        Some("arn:aws:acm:us-east-2:123456789012:certificate/abc")
    );
    assert_eq!(manifest.tags.get("team").map(String::as_str), Some("platform"));
}

#[test]
fn loads_gcp_seed_manifest() {
    let manifest = Manifest::load(GCP_SEED.as_bytes()).expect("loads");
    assert_eq!(manifest.provider.name, ProviderName::Gcp);
    assert_eq!(manifest.provider.project_id.as_deref(), Some("new-proj"));
    assert_eq!(
        manifest.provider.billing_account_id.as_deref(),
        Some("XXXXXX-XXXXXX-XXXXXX")
    );
    assert!(manifest.provider.public_access, "public access defaults to true");
    assert_eq!(manifest.cloud_run.cpu, "1");
    assert_eq!(manifest.cloud_run.memory, "512Mi");
    assert_eq!(manifest.cloud_run.max_instances, Some(100));
    assert_eq!(manifest.cloud_run.min_instances, None);
}

#[test]
fn load_file_round_trips_through_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(AWS_FULL.as_bytes()).expect("writes");
    let manifest = Manifest::load_file(file.path()).expect("loads from disk");
    assert_eq!(manifest.application.name, "my-app");

    let canonical = serde_yaml_bw_round_trip(&manifest);
    assert_eq!(manifest, canonical);
}

fn serde_yaml_bw_round_trip(manifest: &Manifest) -> Manifest {
    let rendered = serde_yaml_bw::to_string(manifest).expect("serializes");
    Manifest::load(rendered.as_bytes()).expect("reloads")
}

#[test]
fn environment_expansion_applies_to_disk_manifests() {
    // SAFETY: test-scoped process environment mutation.
    unsafe { std::env::set_var("MANIFEST_LOAD_TEST_REGION", "eu-central-1") };
    let yaml = r#"
application: {name: a}
environment: {name: a-env}
image: "a:latest"
provider:
  name: aws
  region: "${MANIFEST_LOAD_TEST_REGION}"
"#;
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(yaml.as_bytes()).expect("writes");
    let manifest = Manifest::load_file(file.path()).expect("loads");
    assert_eq!(manifest.provider.region.as_deref(), Some("eu-central-1"));
}

#[test]
fn image_containers_exclusivity_is_enforced() {
    let both = r#"
application: {name: a}
environment: {name: a-env}
image: "a:latest"
containers:
  - {name: web, image: "a:latest"}
provider: {name: aws}
"#;
    assert!(Manifest::load(both.as_bytes()).is_err());

    let neither = r#"
application: {name: a}
environment: {name: a-env}
provider: {name: aws}
"#;
    assert!(Manifest::load(neither.as_bytes()).is_err());
}

#[test]
fn oci_provider_parses_but_gets_no_engine_guarantees() {
    let yaml = r#"
application: {name: a}
environment: {name: a-env}
image: "a:latest"
provider: {name: oci, region: us-ashburn-1}
"#;
    let manifest = Manifest::load(yaml.as_bytes()).expect("oci is a valid provider name");
    assert_eq!(manifest.provider.name, ProviderName::Oci);
}
