use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::identity::{AppName, InstanceId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToggleCount {
    pub yes: u64,
    pub no: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsBucket {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub toggles: BTreeMap<String, ToggleCount>,
}

/// Evaluation counts since the previous report, in the shape the
/// flag-management API accepts on its metrics endpoint.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub app_name: AppName,
    pub instance_id: InstanceId,
    pub bucket: MetricsBucket,
}

#[derive(Debug)]
struct Bucket {
    start: DateTime<Utc>,
    toggles: BTreeMap<String, ToggleCount>,
}

impl Bucket {
    fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start,
            toggles: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Metrics {
    enabled: bool,
    app_name: AppName,
    instance_id: InstanceId,
    bucket: Mutex<Bucket>,
}

impl Metrics {
    pub(crate) fn new(enabled: bool, app_name: AppName, instance_id: InstanceId) -> Self {
        Self {
            enabled,
            app_name,
            instance_id,
            bucket: Mutex::new(Bucket::starting_at(Utc::now())),
        }
    }

    pub(crate) fn record(&self, feature: &str, enabled: bool) {
        if !self.enabled {
            return;
        }

        let mut bucket = self.bucket.lock();
        let count = bucket.toggles.entry(feature.to_string()).or_default();

        if enabled {
            count.yes += 1;
        } else {
            count.no += 1;
        }
    }

    /// Closes the current bucket and starts a new one.
    pub(crate) fn take(&self) -> MetricsReport {
        let now = Utc::now();
        let finished = std::mem::replace(&mut *self.bucket.lock(), Bucket::starting_at(now));

        MetricsReport {
            app_name: self.app_name.clone(),
            instance_id: self.instance_id.clone(),
            bucket: MetricsBucket {
                start: finished.start,
                stop: now,
                toggles: finished.toggles,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(enabled: bool) -> Metrics {
        Metrics::new(enabled, "checkout".into(), "instance-1".into())
    }

    #[test]
    fn counts_yes_and_no_per_flag() {
        let metrics = metrics(true);
        metrics.record("new_ui", true);
        metrics.record("new_ui", true);
        metrics.record("new_ui", false);
        metrics.record("checkout", false);

        let report = metrics.take();
        assert_eq!(report.bucket.toggles["new_ui"], ToggleCount { yes: 2, no: 1 });
        assert_eq!(report.bucket.toggles["checkout"], ToggleCount { yes: 0, no: 1 });
        assert!(report.bucket.start <= report.bucket.stop);
    }

    #[test]
    fn taking_a_report_starts_a_new_bucket() {
        let metrics = metrics(true);
        metrics.record("new_ui", true);

        let first = metrics.take();
        let second = metrics.take();

        assert!(second.bucket.toggles.is_empty());
        assert!(second.bucket.start >= first.bucket.stop);
    }

    #[test]
    fn disabled_metrics_record_nothing() {
        let metrics = metrics(false);
        metrics.record("new_ui", true);

        assert!(metrics.take().bucket.toggles.is_empty());
    }

    #[test]
    fn report_uses_the_api_field_names() {
        let metrics = metrics(true);
        metrics.record("new_ui", true);

        let json = serde_json::to_value(metrics.take()).unwrap();
        assert_eq!(json["appName"], "checkout");
        assert_eq!(json["instanceId"], "instance-1");
        assert_eq!(json["bucket"]["toggles"]["new_ui"]["yes"], 1);
    }
}
