//! Deterministic Elastic Beanstalk option settings.
//!
//! Everything an environment's configuration derives from the manifest is
//! computed here as plain values so the mapping stays testable without an
//! SDK client.

use crate::manifest::Manifest;

pub const ENV_VAR_NAMESPACE: &str = "aws:elasticbeanstalk:application:environment";

/// One namespaced configuration option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSetting {
    pub namespace: String,
    pub option_name: String,
    pub value: String,
}

fn option(namespace: &str, option_name: &str, value: impl Into<String>) -> OptionSetting {
    OptionSetting {
        namespace: namespace.to_string(),
        option_name: option_name.to_string(),
        value: value.into(),
    }
}

/// Build the full option-settings list for create/update environment.
///
/// The order is deterministic: compute shape, IAM, health, monitoring,
/// logs, listeners, then environment variables in map order.
pub fn build(manifest: &Manifest) -> Vec<OptionSetting> {
    let mut settings = Vec::new();

    settings.push(option(
        "aws:autoscaling:launchconfiguration",
        "InstanceType",
        &manifest.instance.instance_type,
    ));
    settings.push(option(
        "aws:elasticbeanstalk:environment",
        "EnvironmentType",
        manifest.instance.environment_type.as_str(),
    ));

    if let Some(profile) = manifest
        .iam
        .instance_profile
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        settings.push(option(
            "aws:autoscaling:launchconfiguration",
            "IamInstanceProfile",
            profile,
        ));
    }
    if let Some(role) = manifest.iam.service_role.as_deref().filter(|r| !r.is_empty()) {
        settings.push(option("aws:elasticbeanstalk:environment", "ServiceRole", role));
    }

    settings.push(option(
        "aws:elasticbeanstalk:application",
        "Application Healthcheck URL",
        &manifest.health_check.path,
    ));
    if manifest.enhanced_health() {
        settings.push(option(
            "aws:elasticbeanstalk:healthreporting:system",
            "SystemType",
            "enhanced",
        ));
    }

    if manifest.monitoring.cloudwatch_metrics {
        settings.push(option(
            "aws:autoscaling:launchconfiguration",
            "MonitoringInterval",
            "1 minute",
        ));
    }

    let logs = &manifest.monitoring.cloudwatch_logs;
    if logs.enabled {
        settings.push(option(
            "aws:elasticbeanstalk:cloudwatch:logs",
            "StreamLogs",
            if logs.stream_logs { "true" } else { "false" },
        ));
        settings.push(option(
            "aws:elasticbeanstalk:cloudwatch:logs",
            "RetentionInDays",
            logs.retention_days.to_string(),
        ));
        settings.push(option(
            "aws:elasticbeanstalk:cloudwatch:logs",
            "DeleteOnTerminate",
            "false",
        ));
        if manifest.enhanced_health() {
            settings.push(option(
                "aws:elasticbeanstalk:cloudwatch:logs:health",
                "HealthStreamingEnabled",
                "true",
            ));
        }
    }

    // 443 is always wired: HTTPS end-to-end when a certificate is
    // configured, TCP passthrough otherwise.
    match manifest.ssl.as_ref() {
        Some(ssl) => {
            settings.push(option("aws:elb:listener:443", "ListenerProtocol", "HTTPS"));
            settings.push(option(
                "aws:elb:listener:443",
                "SSLCertificateId",
                &ssl.certificate_arn,
            ));
            settings.push(option("aws:elb:listener:443", "InstancePort", "443"));
            settings.push(option("aws:elb:listener:443", "InstanceProtocol", "HTTPS"));
        }
        None => {
            settings.push(option("aws:elb:listener:443", "ListenerProtocol", "TCP"));
            settings.push(option("aws:elb:listener:443", "InstancePort", "443"));
            settings.push(option("aws:elb:listener:443", "InstanceProtocol", "TCP"));
        }
    }

    for (name, value) in &manifest.environment_variables {
        settings.push(option(ENV_VAR_NAMESPACE, name, value));
    }

    settings
}
