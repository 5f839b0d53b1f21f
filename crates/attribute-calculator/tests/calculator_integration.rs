//! 计算引擎集成测试

use calculator::template::TemplateError;
use calculator::{AccountId, Calculator, CalculatorError, EvaluationContext, MAX_PASSES, RuleSet};
use serde_json::{Map, Value, json};

const RULES: &str = r#"
global:
  domain: sae.com
  base_dn: "dc=SAE,dc=com"
targets:
  LDAP:
    rules:
      login: "{{ (firstname ~ '.' ~ lastname) | lower }}"
      cn: "{{ firstname }} {{ lastname }}"
      mail: "{{ login }}@{{ global.domain }}"
      dn: "uid={{ login }},{{ global.base_dn | lower }}"
    object_classes: [inetOrgPerson]
    server:
      host: localhost
      port: 389
  SQL:
    rules:
      username: "{{ accountId }}"
      role: APP_USER
  ODOO:
    rules:
      login: "{{ email }}"
      active: true
"#;

fn calculator() -> Calculator {
    Calculator::new(RuleSet::from_yaml_str(RULES).unwrap())
}

fn source() -> Map<String, Value> {
    match json!({
        "firstname": "Jean",
        "lastname": "Dupont",
        "email": "j.dupont@example.com",
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn test_ldap_attributes_resolve_across_passes() {
    let result = calculator()
        .calculate(&source(), &AccountId::from(1_i64), Some(targets(&["LDAP"]).as_slice()))
        .unwrap();

    let ldap = &result["LDAP"];
    assert_eq!(ldap["login"], "jean.dupont");
    assert_eq!(ldap["cn"], "Jean Dupont");
    assert_eq!(ldap["mail"], "jean.dupont@sae.com");
    assert_eq!(ldap["dn"], "uid=jean.dupont,dc=sae,dc=com");
}

#[test]
fn test_function_style_formulas_resolve_across_passes() {
    let rule_set = RuleSet::from_yaml_str(
        r#"
global:
  domain: sae.com
  base_dn: "dc=sae,dc=com"
targets:
  LDAP:
    rules:
      login: "{{ lower(firstname + '.' + lastname) }}"
      mail: "{{ login + '@' + global.domain }}"
      dn: "{{ 'uid=' + login + ',' + global.base_dn }}"
"#,
    )
    .unwrap();

    let source = match json!({"firstname": "Jean", "lastname": "Dupont"}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    let result = Calculator::new(rule_set)
        .calculate(&source, &AccountId::from("jdupont"), Some(targets(&["LDAP"]).as_slice()))
        .unwrap();

    assert_eq!(
        Value::Object(result["LDAP"].clone()),
        json!({
            "login": "jean.dupont",
            "mail": "jean.dupont@sae.com",
            "dn": "uid=jean.dupont,dc=sae,dc=com",
        })
    );
}

#[test]
fn test_statement_block_formula_is_an_error() {
    let rule_set = RuleSet::from_yaml_str(
        r#"
targets:
  T:
    rules:
      a: "{% if admin %}ADMIN{% else %}USER{% endif %}"
"#,
    )
    .unwrap();

    let source = match json!({"admin": true}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    let err = Calculator::new(rule_set)
        .calculate(&source, &AccountId::from(1_i64), None)
        .unwrap_err();

    let CalculatorError::TemplateEvaluation { target, attribute, source } = err;
    assert_eq!(target, "T");
    assert_eq!(attribute, "a");
    assert!(matches!(source, TemplateError::Syntax { .. }));
}

#[test]
fn test_all_targets_in_rule_set_order() {
    let result = calculator().calculate(&source(), &AccountId::from(1001_i64), None).unwrap();

    assert_eq!(result.keys().collect::<Vec<_>>(), ["LDAP", "SQL", "ODOO"]);
    assert_eq!(result["SQL"], json!({"username": 1001, "role": "APP_USER"}).as_object().unwrap().clone());
    assert_eq!(result["ODOO"]["login"], "j.dupont@example.com");
    assert_eq!(result["ODOO"]["active"], true);
}

#[test]
fn test_target_restriction() {
    let result = calculator()
        .calculate(&source(), &AccountId::from(1_i64), Some(targets(&["SQL"]).as_slice()))
        .unwrap();
    assert_eq!(result.keys().collect::<Vec<_>>(), ["SQL"]);
}

#[test]
fn test_unknown_target_is_skipped() {
    let result = calculator()
        .calculate(&source(), &AccountId::from(1_i64), Some(targets(&["LDAP", "GHOST"]).as_slice()))
        .unwrap();
    assert_eq!(result.keys().collect::<Vec<_>>(), ["LDAP"]);
}

#[test]
fn test_null_attributes_are_dropped() {
    let rule_set = RuleSet::from_yaml_str(
        r#"
targets:
  HR:
    rules:
      manager: "{{ manager_id }}"
      explicit_null: null
      nested: { unset: null }
      kept: "dept:{{ department }}"
"#,
    )
    .unwrap();

    let result = Calculator::new(rule_set)
        .calculate(&source(), &AccountId::from(1_i64), None)
        .unwrap();

    let hr = &result["HR"];
    assert!(!hr.contains_key("manager"));
    assert!(!hr.contains_key("explicit_null"));
    assert!(hr.values().all(|v| !v.is_null()));
    // 嵌套结构中的 null 保留
    assert_eq!(hr["nested"], json!({"unset": null}));
    // 文本模板中的未定义变量渲染为空串
    assert_eq!(hr["kept"], "dept:");
}

#[test]
fn test_literals_pass_through() {
    let rule_set = RuleSet::from_yaml_str(
        r#"
targets:
  APP:
    rules:
      enabled: false
      quota: 1.5
      level: 3
      groups: [staff, "{{ department | default('none') }}"]
"#,
    )
    .unwrap();

    let result = Calculator::new(rule_set)
        .calculate(&Map::new(), &AccountId::from("x"), None)
        .unwrap();

    let app = &result["APP"];
    assert_eq!(app["enabled"], false);
    assert_eq!(app["quota"], 1.5);
    assert_eq!(app["level"], 3);
    assert_eq!(app["groups"], json!(["staff", "none"]));
}

#[test]
fn test_calculate_is_idempotent() {
    let calculator = calculator();
    let first = calculator.calculate(&source(), &AccountId::from(7_i64), None).unwrap();
    let second = calculator.calculate(&source(), &AccountId::from(7_i64), None).unwrap();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_circular_formulas_stop_after_max_passes() {
    let rule_set = RuleSet::from_yaml_str(
        r#"
targets:
  LOOP:
    rules:
      a: "{{ b }}x"
      b: "{{ a }}y"
"#,
    )
    .unwrap();
    let calculator = Calculator::new(rule_set);

    let base = calculator.base_environment(&Map::new(), &AccountId::from(1_i64));
    let target = calculator.rules().target("LOOP").unwrap();
    let resolution = calculator.resolve_target("LOOP", target, &base).unwrap();

    assert_eq!(resolution.passes, MAX_PASSES);
    assert!(!resolution.converged);
    assert_eq!(resolution.attributes["a"], "xyx");
    assert_eq!(resolution.attributes["b"], "yxy");
}

#[test]
fn test_independent_target_matches_single_render() {
    let calculator = calculator();
    let base = calculator.base_environment(&source(), &AccountId::from(1001_i64));
    let target = calculator.rules().target("ODOO").unwrap();

    let resolution = calculator.resolve_target("ODOO", target, &base).unwrap();
    assert_eq!(resolution.passes, 1);
    assert!(resolution.converged);

    let scope = calculator::template::Scope::new(&base);
    for (name, formula) in target.rules() {
        assert_eq!(resolution.attributes[name], formula.resolve(&scope).unwrap());
    }
}

#[test]
fn test_source_alias_disambiguates_shadowed_names() {
    let rule_set = RuleSet::from_yaml_str(
        r#"
targets:
  ODOO:
    rules:
      email: "{{ source.email | upper }}"
      copy: "{{ source.email }}"
"#,
    )
    .unwrap();

    let result = Calculator::new(rule_set)
        .calculate(&source(), &AccountId::from(1_i64), None)
        .unwrap();
    assert_eq!(result["ODOO"]["email"], "J.DUPONT@EXAMPLE.COM");
    assert_eq!(result["ODOO"]["copy"], "j.dupont@example.com");
}

#[test]
fn test_bare_global_names_do_not_override_source() {
    let rule_set = RuleSet::from_yaml_str(
        r#"
global:
  domain: sae.com
  firstname: Nobody
targets:
  T:
    rules:
      a: "{{ firstname }}@{{ domain }}"
"#,
    )
    .unwrap();

    let result = Calculator::new(rule_set)
        .calculate(&source(), &AccountId::from(1_i64), None)
        .unwrap();
    assert_eq!(result["T"]["a"], "Jean@sae.com");
}

#[test]
fn test_evaluation_context_request() {
    let ctx: EvaluationContext = serde_json::from_value(json!({
        "sourceAttributes": {"firstname": "Jean", "lastname": "Dupont"},
        "accountId": "jdupont",
        "targets": ["SQL", "LDAP"],
    }))
    .unwrap();

    let result = calculator().evaluate(&ctx).unwrap();
    assert_eq!(result.keys().collect::<Vec<_>>(), ["SQL", "LDAP"]);
    assert_eq!(result["SQL"]["username"], "jdupont");
}

#[test]
fn test_calculator_is_shared_across_threads() {
    let calculator = calculator();
    let handles: Vec<_> = (0..4_i64)
        .map(|i| {
            let calculator = calculator.clone();
            std::thread::spawn(move || {
                calculator
                    .calculate(&source(), &AccountId::from(i), Some(targets(&["SQL"]).as_slice()))
                    .unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().unwrap();
        assert_eq!(result["SQL"]["username"], i as i64);
    }
}
