use proptest::prelude::*;

use heat_reconciler::models::{
    reasons, ConditionSet, ConditionStatus, ConditionType, HeatSpec, SubComponentSpec,
};
use heat_reconciler::orchestration::ConfigInputs;

/// Strategy for generating a single condition status
pub fn condition_status_strategy() -> impl Strategy<Value = ConditionStatus> {
    prop_oneof![
        Just(ConditionStatus::True),
        Just(ConditionStatus::False),
        Just(ConditionStatus::Unknown),
    ]
}

/// Strategy for generating a full set of stage conditions
pub fn condition_set_strategy() -> impl Strategy<Value = ConditionSet> {
    prop::collection::vec(condition_status_strategy(), ConditionType::STAGES.len()).prop_map(
        |statuses| {
            let mut set = ConditionSet::initialized();
            for (stage, status) in ConditionType::STAGES.iter().zip(statuses) {
                match status {
                    ConditionStatus::True => set.mark_true(*stage, "ok"),
                    ConditionStatus::False => {
                        set.mark_false(*stage, reasons::REQUESTED, "in progress")
                    }
                    ConditionStatus::Unknown => {
                        set.mark_unknown(*stage, reasons::WAITING, "not observed")
                    }
                };
            }
            set
        },
    )
}

/// Strategy for per-stage readiness scripts, one flag per stage
pub fn stage_script_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), ConditionType::STAGES.len())
}

fn ini_value_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,16}"
}

/// Strategy for generating custom service configuration snippets
pub fn custom_config_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec((ini_value_strategy(), ini_value_strategy()), 0..4).prop_map(|pairs| {
        if pairs.is_empty() {
            return String::new();
        }
        let mut lines = vec!["[DEFAULT]".to_string()];
        lines.extend(pairs.into_iter().map(|(k, v)| format!("{k} = {v}")));
        lines.join("\n")
    })
}

/// Strategy for generating valid Heat specs
pub fn heat_spec_strategy() -> impl Strategy<Value = HeatSpec> {
    (
        custom_config_strategy(),
        prop::collection::btree_map("[a-z]{1,8}\\.conf", ini_value_strategy(), 0..3),
        prop::option::of(0i32..4),
        prop::option::of(0i32..4),
        prop::option::of(0i32..4),
    )
        .prop_map(|(custom, overwrites, api, cfnapi, engine)| {
            let mut spec = HeatSpec::new("openstack");
            spec.custom_service_config = custom;
            spec.default_config_overwrite = overwrites;
            spec.heat_api = SubComponentSpec {
                replicas: api,
                ..SubComponentSpec::default()
            };
            spec.heat_cfnapi = SubComponentSpec {
                replicas: cfnapi,
                ..SubComponentSpec::default()
            };
            spec.heat_engine = SubComponentSpec {
                replicas: engine,
                ..SubComponentSpec::default()
            };
            spec
        })
}

/// Strategy for generating probe-derived configuration inputs
pub fn config_inputs_strategy() -> impl Strategy<Value = ConfigInputs> {
    (
        "[0-9a-f]{64}",
        "[a-z][a-z0-9-]{0,30}",
        prop::option::of("[a-z]{1,12}\\.openstack\\.svc"),
    )
        .prop_map(|(secret_fingerprint, transport_url_secret, database_hostname)| {
            ConfigInputs {
                secret_fingerprint,
                transport_url_secret,
                database_hostname,
            }
        })
}

/// Strategy for generating secret passwords
pub fn password_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]{8,24}"
}
