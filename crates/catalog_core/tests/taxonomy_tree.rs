use catalog_core::db::open_db_in_memory;
use catalog_core::{
    DeferredWorkRegistry, SqliteTaxonomyRepository, StaleWorkRepository, Taxon,
    TaxonServiceError, TaxonValidationError, TaxonomyRepository, UpdateTaxonRequest,
};
use catalog_core::TaxonService;
use rusqlite::Connection;
use uuid::Uuid;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn service(conn: &Connection) -> TaxonService<SqliteTaxonomyRepository<'_>> {
    TaxonService::new(SqliteTaxonomyRepository::try_new(conn).unwrap())
}

fn names(children: &[Taxon]) -> Vec<&str> {
    children.iter().map(|taxon| taxon.name.as_str()).collect()
}

#[test]
fn create_taxonomy_persists_root_and_registers_rebuild() {
    let conn = setup();
    let mut registry = DeferredWorkRegistry::new();

    let (taxonomy, root) = service(&conn)
        .create_taxonomy(" Categories ", &mut registry)
        .unwrap();

    assert_eq!(taxonomy.name, "Categories");
    assert!(root.is_root());
    assert_eq!(service(&conn).get_taxon(taxonomy.uuid, root.uuid).unwrap(), root);
    assert_eq!(registry.pending_hierarchy_rebuilds(), vec![taxonomy.uuid]);
    assert!(registry.pending_product_regenerations().is_empty());

    let repo = SqliteTaxonomyRepository::try_new(&conn).unwrap();
    assert_eq!(repo.stale_hierarchies().unwrap(), vec![taxonomy.uuid]);
}

#[test]
fn children_are_appended_in_creation_order() {
    let conn = setup();
    let mut registry = DeferredWorkRegistry::new();
    let svc = service(&conn);
    let (taxonomy, root) = svc.create_taxonomy("Categories", &mut registry).unwrap();

    let shirts = svc
        .create_taxon(taxonomy.uuid, root.uuid, "Shirts", false, &mut registry)
        .unwrap();
    let pants = svc
        .create_taxon(taxonomy.uuid, root.uuid, "Pants", false, &mut registry)
        .unwrap();

    assert_eq!(shirts.position, 0);
    assert_eq!(pants.position, 1);
    assert_eq!(shirts.slug, "shirts");
    let children = svc.list_children(taxonomy.uuid, root.uuid).unwrap();
    assert_eq!(names(&children), vec!["Shirts", "Pants"]);
}

#[test]
fn automatic_taxon_registers_product_regeneration() {
    let conn = setup();
    let svc = service(&conn);
    let (taxonomy, root) = svc
        .create_taxonomy("Categories", &mut DeferredWorkRegistry::new())
        .unwrap();
    let mut registry = DeferredWorkRegistry::new();

    let sale = svc
        .create_taxon(taxonomy.uuid, root.uuid, "Sale", true, &mut registry)
        .unwrap();

    assert!(sale.marked_for_regenerate_products);
    assert_eq!(registry.pending_hierarchy_rebuilds(), vec![taxonomy.uuid]);
    assert_eq!(registry.pending_product_regenerations(), vec![sale.uuid]);
}

#[test]
fn duplicate_sibling_names_are_rejected() {
    let conn = setup();
    let svc = service(&conn);
    let mut registry = DeferredWorkRegistry::new();
    let (taxonomy, root) = svc.create_taxonomy("Categories", &mut registry).unwrap();
    let shirts = svc
        .create_taxon(taxonomy.uuid, root.uuid, "Shirts", false, &mut registry)
        .unwrap();
    let pants = svc
        .create_taxon(taxonomy.uuid, root.uuid, "Pants", false, &mut registry)
        .unwrap();

    let err = svc
        .create_taxon(taxonomy.uuid, root.uuid, " Shirts ", false, &mut registry)
        .unwrap_err();
    assert!(matches!(err, TaxonServiceError::DuplicateName { ref name } if name == "Shirts"));

    let err = svc
        .update_taxon(
            taxonomy.uuid,
            pants.uuid,
            UpdateTaxonRequest {
                name: Some("Shirts".to_string()),
                ..UpdateTaxonRequest::default()
            },
            &mut registry,
        )
        .unwrap_err();
    assert!(matches!(err, TaxonServiceError::DuplicateName { .. }));

    // Same name under a different parent is fine.
    svc.create_taxon(taxonomy.uuid, shirts.uuid, "Shirts", false, &mut registry)
        .unwrap();
}

#[test]
fn root_cannot_be_reparented_or_deleted() {
    let conn = setup();
    let svc = service(&conn);
    let mut registry = DeferredWorkRegistry::new();
    let (taxonomy, root) = svc.create_taxonomy("Categories", &mut registry).unwrap();
    let shirts = svc
        .create_taxon(taxonomy.uuid, root.uuid, "Shirts", false, &mut registry)
        .unwrap();

    let err = svc
        .update_taxon(
            taxonomy.uuid,
            root.uuid,
            UpdateTaxonRequest {
                parent_id: Some(shirts.uuid),
                ..UpdateTaxonRequest::default()
            },
            &mut registry,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TaxonServiceError::Validation(TaxonValidationError::RootLocked(id)) if id == root.uuid
    ));

    let err = svc
        .delete_taxon(taxonomy.uuid, root.uuid, &mut registry)
        .unwrap_err();
    assert!(matches!(
        err,
        TaxonServiceError::Validation(TaxonValidationError::RootLocked(_))
    ));
}

#[test]
fn moves_that_create_cycles_are_rejected() {
    let conn = setup();
    let svc = service(&conn);
    let mut registry = DeferredWorkRegistry::new();
    let (taxonomy, root) = svc.create_taxonomy("Categories", &mut registry).unwrap();
    let clothing = svc
        .create_taxon(taxonomy.uuid, root.uuid, "Clothing", false, &mut registry)
        .unwrap();
    let shirts = svc
        .create_taxon(taxonomy.uuid, clothing.uuid, "Shirts", false, &mut registry)
        .unwrap();

    for parent in [clothing.uuid, shirts.uuid] {
        let err = svc
            .update_taxon(
                taxonomy.uuid,
                clothing.uuid,
                UpdateTaxonRequest {
                    parent_id: Some(parent),
                    ..UpdateTaxonRequest::default()
                },
                &mut registry,
            )
            .unwrap_err();
        assert!(matches!(err, TaxonServiceError::CycleDetected { .. }));
    }
}

#[test]
fn move_and_rename_register_rebuild_and_persist() {
    let conn = setup();
    let svc = service(&conn);
    let (taxonomy, root) = svc
        .create_taxonomy("Categories", &mut DeferredWorkRegistry::new())
        .unwrap();
    let clothing = svc
        .create_taxon(
            taxonomy.uuid,
            root.uuid,
            "Clothing",
            false,
            &mut DeferredWorkRegistry::new(),
        )
        .unwrap();
    let shirts = svc
        .create_taxon(
            taxonomy.uuid,
            root.uuid,
            "Shirts",
            false,
            &mut DeferredWorkRegistry::new(),
        )
        .unwrap();
    let mut registry = DeferredWorkRegistry::new();

    let moved = svc
        .update_taxon(
            taxonomy.uuid,
            shirts.uuid,
            UpdateTaxonRequest {
                name: Some("Summer Shirts".to_string()),
                parent_id: Some(clothing.uuid),
                ..UpdateTaxonRequest::default()
            },
            &mut registry,
        )
        .unwrap();

    assert_eq!(moved.parent_uuid, Some(clothing.uuid));
    assert_eq!(moved.slug, "summer-shirts");
    assert_eq!(svc.get_taxon(taxonomy.uuid, shirts.uuid).unwrap(), moved);
    assert_eq!(registry.pending_hierarchy_rebuilds(), vec![taxonomy.uuid]);
    assert!(registry.pending_product_regenerations().is_empty());
    assert_eq!(
        names(&svc.list_children(taxonomy.uuid, clothing.uuid).unwrap()),
        vec!["Summer Shirts"]
    );
}

#[test]
fn no_op_update_registers_nothing() {
    let conn = setup();
    let svc = service(&conn);
    let (taxonomy, root) = svc
        .create_taxonomy("Categories", &mut DeferredWorkRegistry::new())
        .unwrap();
    let shirts = svc
        .create_taxon(
            taxonomy.uuid,
            root.uuid,
            "Shirts",
            false,
            &mut DeferredWorkRegistry::new(),
        )
        .unwrap();
    let mut registry = DeferredWorkRegistry::new();

    let unchanged = svc
        .update_taxon(
            taxonomy.uuid,
            shirts.uuid,
            UpdateTaxonRequest {
                name: Some(" Shirts ".to_string()),
                parent_id: Some(root.uuid),
                position: Some(0),
                automatic: Some(false),
            },
            &mut registry,
        )
        .unwrap();

    assert_eq!(unchanged, shirts);
    assert!(registry.is_empty());
}

#[test]
fn taxon_with_children_cannot_be_deleted() {
    let conn = setup();
    let svc = service(&conn);
    let mut registry = DeferredWorkRegistry::new();
    let (taxonomy, root) = svc.create_taxonomy("Categories", &mut registry).unwrap();
    let clothing = svc
        .create_taxon(taxonomy.uuid, root.uuid, "Clothing", false, &mut registry)
        .unwrap();
    let shirts = svc
        .create_taxon(taxonomy.uuid, clothing.uuid, "Shirts", false, &mut registry)
        .unwrap();

    let err = svc
        .delete_taxon(taxonomy.uuid, clothing.uuid, &mut registry)
        .unwrap_err();
    assert!(matches!(
        err,
        TaxonServiceError::Validation(TaxonValidationError::HasChildren(id)) if id == clothing.uuid
    ));

    svc.delete_taxon(taxonomy.uuid, shirts.uuid, &mut registry)
        .unwrap();
    svc.delete_taxon(taxonomy.uuid, clothing.uuid, &mut registry)
        .unwrap();
    assert!(svc.list_children(taxonomy.uuid, root.uuid).unwrap().is_empty());
}

#[test]
fn ids_are_scoped_to_their_taxonomy() {
    let conn = setup();
    let svc = service(&conn);
    let mut registry = DeferredWorkRegistry::new();
    let (first, first_root) = svc.create_taxonomy("Categories", &mut registry).unwrap();
    let (second, _) = svc.create_taxonomy("Brands", &mut registry).unwrap();

    let err = svc.get_taxon(second.uuid, first_root.uuid).unwrap_err();
    assert!(matches!(err, TaxonServiceError::TaxonNotFound(id) if id == first_root.uuid));

    let err = svc
        .create_taxon(second.uuid, first_root.uuid, "Nike", false, &mut registry)
        .unwrap_err();
    assert!(matches!(err, TaxonServiceError::ParentNotFound(_)));

    let err = svc
        .create_taxon(Uuid::new_v4(), first_root.uuid, "Nike", false, &mut registry)
        .unwrap_err();
    assert!(matches!(err, TaxonServiceError::TaxonomyNotFound(_)));

    let repo = SqliteTaxonomyRepository::try_new(&conn).unwrap();
    assert!(repo.get_taxonomy(first.uuid).unwrap().is_some());
}
