use catalog_core::db::open_db_in_memory;
use catalog_core::{
    DeferredWorkRegistry, RepoError, RuleInput, RuleSetError, RuleValidationError,
    SqliteRuleRepository, SqliteTaxonomyRepository, StaleWorkRepository, Taxon, TaxonId,
    TaxonRuleService, TaxonRulesResponse, TaxonService, Taxonomy,
};
use rusqlite::Connection;
use serde_json::json;

struct Fixture {
    conn: Connection,
    taxonomy: Taxonomy,
    taxon: Taxon,
}

fn setup() -> Fixture {
    let conn = open_db_in_memory().unwrap();
    let mut registry = DeferredWorkRegistry::new();
    let (taxonomy, taxon) = {
        let service = TaxonService::new(SqliteTaxonomyRepository::try_new(&conn).unwrap());
        let (taxonomy, root) = service.create_taxonomy("Categories", &mut registry).unwrap();
        let taxon = service
            .create_taxon(taxonomy.uuid, root.uuid, "Shirts", true, &mut registry)
            .unwrap();
        (taxonomy, taxon)
    };
    let fixture = Fixture {
        conn,
        taxonomy,
        taxon,
    };
    clear_markers(&fixture);
    fixture
}

fn clear_markers(fixture: &Fixture) {
    let repo = SqliteTaxonomyRepository::try_new(&fixture.conn).unwrap();
    for taxonomy in repo.stale_hierarchies().unwrap() {
        repo.clear_hierarchy_marker(taxonomy).unwrap();
    }
    for taxon in repo.stale_product_sets().unwrap() {
        repo.clear_product_marker(taxon).unwrap();
    }
}

fn update(
    fixture: &Fixture,
    rules: &[RuleInput],
    registry: &mut DeferredWorkRegistry,
) -> Result<TaxonRulesResponse, RuleSetError> {
    let service = TaxonRuleService::new(SqliteRuleRepository::try_new(&fixture.conn).unwrap());
    service.update_taxon_rules(fixture.taxonomy.uuid, fixture.taxon.uuid, rules, registry)
}

fn load(fixture: &Fixture) -> TaxonRulesResponse {
    let service = TaxonRuleService::new(SqliteRuleRepository::try_new(&fixture.conn).unwrap());
    service
        .get_taxon_rules(fixture.taxonomy.uuid, fixture.taxon.uuid)
        .unwrap()
}

fn product_marker(conn: &Connection, taxon: TaxonId) -> i64 {
    conn.query_row(
        "SELECT marked_for_regenerate_products FROM taxons WHERE taxon_uuid = ?1;",
        [taxon.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}

fn abc() -> Vec<RuleInput> {
    vec![
        RuleInput::new("product_name", "a"),
        RuleInput::new("product_name", "b"),
        RuleInput::new("product_name", "c"),
    ]
}

#[test]
fn first_update_persists_rules_in_order_and_marks_products_stale() {
    let fixture = setup();
    let mut registry = DeferredWorkRegistry::new();

    let response = update(&fixture, &abc(), &mut registry).unwrap();

    assert_eq!(response.taxon_id, fixture.taxon.uuid);
    let values: Vec<&str> = response.rules.iter().map(|rule| rule.value.as_str()).collect();
    assert_eq!(values, vec!["a", "b", "c"]);
    assert_eq!(load(&fixture), response);
    assert_eq!(registry.pending_product_regenerations(), vec![fixture.taxon.uuid]);
    assert!(registry.pending_hierarchy_rebuilds().is_empty());
    assert_eq!(product_marker(&fixture.conn, fixture.taxon.uuid), 1);
}

#[test]
fn resubmitting_same_content_in_any_order_is_a_no_op() {
    let fixture = setup();
    let before = update(&fixture, &abc(), &mut DeferredWorkRegistry::new()).unwrap();
    clear_markers(&fixture);

    let mut shuffled = abc();
    shuffled.reverse();
    shuffled[0].kind = " PRODUCT_NAME ".to_string();
    shuffled[1].match_policy = Some("Is_Equal_To".to_string());
    let mut registry = DeferredWorkRegistry::new();

    let after = update(&fixture, &shuffled, &mut registry).unwrap();

    assert_eq!(after, before);
    assert!(registry.is_empty());
    assert_eq!(product_marker(&fixture.conn, fixture.taxon.uuid), 0);
}

#[test]
fn replacing_one_rule_removes_and_adds_without_touching_others() {
    let fixture = setup();
    let before = update(&fixture, &abc(), &mut DeferredWorkRegistry::new()).unwrap();

    let after = update(
        &fixture,
        &[
            RuleInput::new("product_name", "a"),
            RuleInput::new("product_name", "b"),
            RuleInput::new("product_name", "d"),
        ],
        &mut DeferredWorkRegistry::new(),
    )
    .unwrap();

    assert_eq!(after.rules.len(), 3);
    assert_eq!(after.rules[0], before.rules[0]);
    assert_eq!(after.rules[1], before.rules[1]);
    assert_eq!(after.rules[2].value, "d");
    assert!(before.rules.iter().all(|rule| rule.id != after.rules[2].id));
    assert_eq!(load(&fixture), after);
}

#[test]
fn id_bearing_entry_updates_rule_in_place() {
    let fixture = setup();
    let before = update(&fixture, &abc(), &mut DeferredWorkRegistry::new()).unwrap();
    let target = before.rules[1].id;

    let mut inputs: Vec<RuleInput> = before
        .rules
        .iter()
        .map(|rule| RuleInput::new(rule.kind.clone(), rule.value.clone()).with_id(rule.id))
        .collect();
    inputs[1] = RuleInput::new("product_property", "red")
        .with_id(target)
        .with_property_name("colour");

    let after = update(&fixture, &inputs, &mut DeferredWorkRegistry::new()).unwrap();

    assert_eq!(after.rules[1].id, target);
    assert_eq!(after.rules[1].kind, "product_property");
    assert_eq!(after.rules[1].property_name.as_deref(), Some("colour"));
    assert_eq!(load(&fixture), after);
}

#[test]
fn id_bearing_entry_without_policy_or_property_keeps_stored_values() {
    let fixture = setup();
    let before = update(
        &fixture,
        &[
            RuleInput::new("product_name", "shirt").with_match_policy("contains"),
            RuleInput::new("product_property", "red").with_property_name("colour"),
        ],
        &mut DeferredWorkRegistry::new(),
    )
    .unwrap();
    clear_markers(&fixture);
    let (name_id, colour_id) = (before.rules[0].id, before.rules[1].id);
    let mut registry = DeferredWorkRegistry::new();

    let unchanged = update(
        &fixture,
        &[
            RuleInput::new("product_name", "shirt").with_id(name_id),
            RuleInput::new("product_property", "red").with_id(colour_id),
        ],
        &mut registry,
    )
    .unwrap();

    assert_eq!(unchanged, before);
    assert!(registry.is_empty());
    assert_eq!(product_marker(&fixture.conn, fixture.taxon.uuid), 0);

    let after = update(
        &fixture,
        &[
            RuleInput::new("product_name", "shirt").with_id(name_id),
            RuleInput::new("product_property", "blue").with_id(colour_id),
        ],
        &mut DeferredWorkRegistry::new(),
    )
    .unwrap();

    assert_eq!(after.rules[0], before.rules[0]);
    assert_eq!(after.rules[1].value, "blue");
    assert_eq!(after.rules[1].property_name.as_deref(), Some("colour"));
    assert_eq!(load(&fixture), after);
}

#[test]
fn validation_failure_leaves_stored_rules_untouched() {
    let fixture = setup();
    let before = update(&fixture, &abc(), &mut DeferredWorkRegistry::new()).unwrap();
    clear_markers(&fixture);
    let mut registry = DeferredWorkRegistry::new();

    let err = update(
        &fixture,
        &[
            RuleInput::new("product_name", "z"),
            RuleInput::new("product_property", "red"),
        ],
        &mut registry,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        RuleSetError::Validation(RuleValidationError::PropertyNameRequired)
    ));
    assert_eq!(load(&fixture), before);
    assert!(registry.is_empty());
    assert_eq!(product_marker(&fixture.conn, fixture.taxon.uuid), 0);
}

#[test]
fn taxon_from_another_taxonomy_is_not_found() {
    let fixture = setup();
    let service = TaxonRuleService::new(SqliteRuleRepository::try_new(&fixture.conn).unwrap());

    let err = service
        .update_taxon_rules(
            uuid::Uuid::new_v4(),
            fixture.taxon.uuid,
            &abc(),
            &mut DeferredWorkRegistry::new(),
        )
        .unwrap_err();
    assert!(matches!(err, RuleSetError::TaxonNotFound(id) if id == fixture.taxon.uuid));
}

#[test]
fn corrupted_rule_row_surfaces_as_storage_error() {
    let fixture = setup();
    fixture
        .conn
        .execute(
            "INSERT INTO taxon_rules (rule_uuid, taxon_uuid, type, value, match_policy, sort_order)
             VALUES (?1, ?2, 'product_colour', 'red', 'is_equal_to', 0);",
            [uuid::Uuid::new_v4().to_string(), fixture.taxon.uuid.to_string()],
        )
        .unwrap();

    let service = TaxonRuleService::new(SqliteRuleRepository::try_new(&fixture.conn).unwrap());
    let err = service
        .get_taxon_rules(fixture.taxonomy.uuid, fixture.taxon.uuid)
        .unwrap_err();
    assert!(matches!(err, RuleSetError::Storage(RepoError::InvalidData(_))));
}

#[test]
fn compile_taxon_rules_uses_persisted_rules() {
    let fixture = setup();
    update(
        &fixture,
        &[
            RuleInput::new("product_name", "shirt").with_match_policy("contains"),
            RuleInput::new("variant_sku", "SKU-").with_match_policy("starts_with"),
        ],
        &mut DeferredWorkRegistry::new(),
    )
    .unwrap();

    let service = TaxonRuleService::new(SqliteRuleRepository::try_new(&fixture.conn).unwrap());
    let compiled = service
        .compile_taxon_rules(fixture.taxonomy.uuid, fixture.taxon.uuid)
        .unwrap();

    assert_eq!(compiled.filters.len(), 1);
    assert_eq!(compiled.filters[0].to_string(), "name*shirt");
    assert_eq!(compiled.requires_full_evaluation.len(), 1);
}

#[test]
fn wire_shapes_use_camel_case() {
    let inputs: Vec<RuleInput> = serde_json::from_value(json!([
        {
            "type": "product_property",
            "value": "red",
            "matchPolicy": "contains",
            "propertyName": "colour"
        },
        { "type": "product_name", "value": "shirt" }
    ]))
    .unwrap();
    assert_eq!(inputs[0].property_name.as_deref(), Some("colour"));
    assert_eq!(inputs[1].match_policy, None);

    let fixture = setup();
    let response = update(&fixture, &inputs, &mut DeferredWorkRegistry::new()).unwrap();
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(value["taxonId"], json!(fixture.taxon.uuid.to_string()));
    assert_eq!(value["rules"][0]["type"], json!("product_property"));
    assert_eq!(value["rules"][0]["matchPolicy"], json!("contains"));
    assert_eq!(value["rules"][0]["propertyName"], json!("colour"));
    assert_eq!(value["rules"][1]["matchPolicy"], json!("is_equal_to"));
    assert_eq!(value["rules"][1]["propertyName"], json!(null));
}

#[test]
fn deleting_taxon_deletes_its_rules() {
    let fixture = setup();
    update(&fixture, &abc(), &mut DeferredWorkRegistry::new()).unwrap();

    let service = TaxonService::new(SqliteTaxonomyRepository::try_new(&fixture.conn).unwrap());
    service
        .delete_taxon(
            fixture.taxonomy.uuid,
            fixture.taxon.uuid,
            &mut DeferredWorkRegistry::new(),
        )
        .unwrap();

    let remaining: i64 = fixture
        .conn
        .query_row("SELECT COUNT(*) FROM taxon_rules;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 0);
}
