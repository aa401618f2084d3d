//! Label keys stamped on operator-launched pods and role predicates over them.

use kube::Resource;

pub const LAUNCHED_BY_OPERATOR_LABEL: &str = "sparkoperator.k8s.io/launched-by-spark-operator";
pub const SPARK_ROLE_LABEL: &str = "spark-role";
pub const DRIVER_ROLE: &str = "driver";
pub const EXECUTOR_ROLE: &str = "executor";

fn label_equals<K: Resource>(obj: &K, key: &str, expected: &str) -> bool {
    obj.meta()
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(|v| v == expected)
        .unwrap_or(false)
}

/// Whether the object was launched by this operator.
pub fn is_managed_launch<K: Resource>(obj: &K) -> bool {
    label_equals(obj, LAUNCHED_BY_OPERATOR_LABEL, "true")
}

/// Whether the object is a Spark driver.
pub fn is_driver<K: Resource>(obj: &K) -> bool {
    label_equals(obj, SPARK_ROLE_LABEL, DRIVER_ROLE)
}

/// Whether the object is a Spark executor.
pub fn is_executor<K: Resource>(obj: &K) -> bool {
    label_equals(obj, SPARK_ROLE_LABEL, EXECUTOR_ROLE)
}
