//! End-to-end tests for relations: forward/reverse edges, slot order,
//! cascade deletion, collections, and undo of link edits.

use metanode::{
    CreateArgs, Direction, Error, Field, ModelDef, PlugPath, Relation, Scene, Value,
};

fn rig_scene() -> Scene {
    let scene = Scene::in_memory();
    scene
        .declare(
            ModelDef::new("rig", "Joint")
                .field(Field::integer("side").default(0))
                .relation(Relation::new("parent", "Joint").far_multi().reverse_name("children")),
        )
        .unwrap();
    scene
        .declare(
            ModelDef::new("rig", "Rig")
                .relation(Relation::new("joints", "Joint").multi()),
        )
        .unwrap();
    scene
}

// ============================================================================
// 1. Forward link is visible from both ends
// ============================================================================

#[test]
fn test_forward_and_reverse_views() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new().name("biped")).unwrap();
    let a = scene.create("Joint", CreateArgs::new().name("hips")).unwrap();
    let b = scene.create("Joint", CreateArgs::new().name("spine")).unwrap();

    let joints = rig.relation("joints").unwrap();
    joints.add(&a).unwrap();
    joints.add(&b).unwrap();

    assert_eq!(joints.all().unwrap(), vec![a.clone(), b.clone()]);
    assert_eq!(joints.length().unwrap(), 2);

    // the synthesized reverse on Joint points back
    let back = a.relation("rig").unwrap();
    assert!(back.relation().is_rev());
    assert_eq!(back.first().unwrap(), Some(rig.clone()));
    assert_eq!(a.related("rig").unwrap(), Some(rig.clone()));

    // edge orientation: forward attribute is the source
    let edge_dst = scene
        .graph()
        .connections(
            &PlugPath::root(rig.id(), "joints").element(0),
            Direction::Outgoing,
        )
        .unwrap();
    assert_eq!(edge_dst, vec![PlugPath::root(a.id(), "rig")]);
}

// ============================================================================
// 2. Reverse synthesis waits for the target type (declaration backlog)
// ============================================================================

#[test]
fn test_reverse_synthesis_backlog() {
    let scene = Scene::in_memory();
    scene
        .declare(
            ModelDef::new("edit", "Reel")
                .relation(Relation::new("clips", "Clip").multi()),
        )
        .unwrap();
    // Clip arrives later; the reverse lands on it at declare time
    scene.declare(ModelDef::new("edit", "Clip")).unwrap();

    let clip_ty = scene.registry().get("Clip").unwrap();
    let reverse = clip_ty.relation("reel").unwrap();
    assert!(reverse.is_rev());
    assert_eq!(reverse.target(), Some("Reel"));

    let reel = scene.create("Reel", CreateArgs::new()).unwrap();
    let clip = scene.create("Clip", CreateArgs::new()).unwrap();
    reel.relation("clips").unwrap().add(&clip).unwrap();
    assert_eq!(clip.related("reel").unwrap(), Some(reel));
}

// ============================================================================
// 3. remove() frees the slot, later adds keep insertion order
// ============================================================================

#[test]
fn test_remove_frees_slot() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();
    let a = scene.create("Joint", CreateArgs::new().name("a")).unwrap();
    let b = scene.create("Joint", CreateArgs::new().name("b")).unwrap();
    let c = scene.create("Joint", CreateArgs::new().name("c")).unwrap();

    let joints = rig.relation("joints").unwrap();
    joints.add(&a).unwrap();
    joints.add(&b).unwrap();
    joints.remove(&a).unwrap();
    joints.add(&c).unwrap();

    assert_eq!(joints.all().unwrap(), vec![b.clone(), c.clone()]);
    assert_eq!(joints.get_at(0).unwrap(), b);
    assert!(matches!(joints.get_at(2), Err(Error::DoesNotExist(_))));

    // removing a stranger is a warning, not an error
    joints.remove(&a).unwrap();
    assert_eq!(joints.length().unwrap(), 2);
}

// ============================================================================
// 4. set() replaces membership in the given order
// ============================================================================

#[test]
fn test_set_replaces_membership() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();
    let a = scene.create("Joint", CreateArgs::new().name("a")).unwrap();
    let b = scene.create("Joint", CreateArgs::new().name("b")).unwrap();
    let c = scene.create("Joint", CreateArgs::new().name("c")).unwrap();

    let joints = rig.relation("joints").unwrap();
    joints.set(&[a.clone(), b.clone()]).unwrap();
    joints.set(&[c.clone(), a.clone()]).unwrap();

    assert_eq!(joints.all().unwrap(), vec![c, a.clone()]);

    // the evicted joint's reverse went with it
    assert_eq!(b.related("rig").unwrap(), None);
    assert_eq!(a.related("rig").unwrap(), Some(rig));
}

// ============================================================================
// 5. assign() points a single slot, replacing the old link
// ============================================================================

#[test]
fn test_assign_replaces() {
    let scene = rig_scene();
    let hips = scene.create("Joint", CreateArgs::new().name("hips")).unwrap();
    let chest = scene.create("Joint", CreateArgs::new().name("chest")).unwrap();
    let spine = scene.create("Joint", CreateArgs::new().name("spine")).unwrap();

    let parent = spine.relation("parent").unwrap();
    parent.assign(Some(&hips)).unwrap();
    assert_eq!(parent.first().unwrap(), Some(hips.clone()));
    assert_eq!(hips.relation("children").unwrap().all().unwrap(), vec![spine.clone()]);

    parent.assign(Some(&chest)).unwrap();
    assert_eq!(parent.first().unwrap(), Some(chest.clone()));
    assert_eq!(hips.relation("children").unwrap().length().unwrap(), 0);

    parent.assign(None).unwrap();
    assert_eq!(parent.first().unwrap(), None);
    assert_eq!(chest.relation("children").unwrap().length().unwrap(), 0);
}

// ============================================================================
// 6. Shape misuse: add on single, assign on array
// ============================================================================

#[test]
fn test_shape_misuse_rejected() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();
    let spine = scene.create("Joint", CreateArgs::new()).unwrap();
    let hips = scene.create("Joint", CreateArgs::new()).unwrap();

    assert!(matches!(
        spine.relation("parent").unwrap().add(&hips),
        Err(Error::Usage(_))
    ));
    assert!(matches!(
        rig.relation("joints").unwrap().assign(Some(&spine)),
        Err(Error::Usage(_))
    ));
}

// ============================================================================
// 7. Links are type-checked against the declared target
// ============================================================================

#[test]
fn test_type_checked_links() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();
    let other = scene.create("Rig", CreateArgs::new()).unwrap();

    let err = rig.relation("joints").unwrap().add(&other).unwrap_err();
    match err {
        Error::TypeError { expected, got } => {
            assert_eq!(expected, "Joint");
            assert_eq!(got, "Rig");
        }
        other => panic!("expected a type error, got {other:?}"),
    }
}

// ============================================================================
// 8. Subtype links need the typed flag; exact relations reject them
// ============================================================================

#[test]
fn test_typed_relation_accepts_subtypes() {
    let scene = Scene::in_memory();
    scene.declare(ModelDef::new("crew", "Person")).unwrap();
    scene
        .declare(ModelDef::new("crew", "Artist").extends("Person"))
        .unwrap();
    scene
        .declare(
            ModelDef::new("crew", "Team")
                .relation(Relation::new("lead", "Person").reverse_name("leads"))
                .relation(Relation::new("members", "Person").multi().typed()),
        )
        .unwrap();

    let team = scene.create("Team", CreateArgs::new()).unwrap();
    let artist = scene.create("Artist", CreateArgs::new()).unwrap();

    // exact relation: an Artist is not a Person here
    let err = team.relation("lead").unwrap().assign(Some(&artist)).unwrap_err();
    assert!(matches!(err, Error::TypeError { .. }));

    // typed relation folds subtypes in
    assert!(team.relation("members").unwrap().add(&artist).unwrap());
    assert_eq!(team.relation("members").unwrap().all().unwrap(), vec![artist]);
}

// ============================================================================
// 9. Double add and self add warn, skip, and report false
// ============================================================================

#[test]
fn test_duplicate_add_skipped() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();
    let a = scene.create("Joint", CreateArgs::new()).unwrap();

    let joints = rig.relation("joints").unwrap();
    assert!(joints.add(&a).unwrap());
    assert!(!joints.add(&a).unwrap());
    assert_eq!(joints.length().unwrap(), 1);

    // a joint cannot be its own parent's child list member
    let children = a.relation("children").unwrap();
    assert!(!children.add(&a).unwrap());
    assert_eq!(children.length().unwrap(), 0);
}

// ============================================================================
// 10. Cascade deletion follows forward cascade relations, cycles included
// ============================================================================

#[test]
fn test_cascade_delete_chain() {
    let scene = Scene::in_memory();
    scene.declare(ModelDef::new("rig", "Effector")).unwrap();
    scene
        .declare(
            ModelDef::new("rig", "Chain")
                .relation(Relation::new("effectors", "Effector").multi().cascade()),
        )
        .unwrap();
    scene
        .declare(
            ModelDef::new("rig", "Setup")
                .relation(Relation::new("chains", "Chain").multi().cascade()),
        )
        .unwrap();

    let setup = scene.create("Setup", CreateArgs::new()).unwrap();
    let chain = setup
        .relation("chains")
        .unwrap()
        .create(CreateArgs::new())
        .unwrap();
    let effector = chain
        .relation("effectors")
        .unwrap()
        .create(CreateArgs::new())
        .unwrap();

    setup.delete().unwrap();

    assert!(!setup.exists());
    assert!(!chain.exists());
    assert!(!effector.exists());
    assert_eq!(scene.graph().node_count(), 0);
}

#[test]
fn test_cascade_delete_cycle_terminates() {
    let scene = Scene::in_memory();
    scene
        .declare(
            ModelDef::new("rig", "A")
                .relation(Relation::new("b", "B").cascade().reverse_name("owner_a")),
        )
        .unwrap();
    scene
        .declare(
            ModelDef::new("rig", "B")
                .relation(Relation::new("a", "A").cascade().reverse_name("owner_b")),
        )
        .unwrap();

    let a = scene.create("A", CreateArgs::new()).unwrap();
    let b = scene.create("B", CreateArgs::new()).unwrap();
    a.relation("b").unwrap().assign(Some(&b)).unwrap();
    b.relation("a").unwrap().assign(Some(&a)).unwrap();

    a.delete().unwrap();

    assert!(!a.exists());
    assert!(!b.exists());
}

// ============================================================================
// 11. Reverse relations never cascade
// ============================================================================

#[test]
fn test_reverse_side_does_not_cascade() {
    let scene = Scene::in_memory();
    scene.declare(ModelDef::new("rig", "Part")).unwrap();
    scene
        .declare(
            ModelDef::new("rig", "Assembly")
                .relation(Relation::new("parts", "Part").multi().cascade()),
        )
        .unwrap();

    let assembly = scene.create("Assembly", CreateArgs::new()).unwrap();
    let part = scene.create("Part", CreateArgs::new()).unwrap();
    assembly.relation("parts").unwrap().add(&part).unwrap();

    // deleting the part must not take the assembly with it
    part.delete().unwrap();
    assert!(assembly.exists());
    assert_eq!(assembly.relation("parts").unwrap().length().unwrap(), 0);
}

// ============================================================================
// 12. Collections hold plain nodes through their message attribute
// ============================================================================

#[test]
fn test_collection_of_plain_nodes() {
    let scene = Scene::in_memory();
    scene
        .declare(ModelDef::new("util", "Selection").relation(Relation::collection("members")))
        .unwrap();

    let selection = scene.create("Selection", CreateArgs::new()).unwrap();
    let cube = scene.graph().create_node("transform", Some("pCube1"), None).unwrap();
    let sphere = scene.graph().create_node("transform", Some("pSphere1"), None).unwrap();

    let members = selection.relation("members").unwrap();
    members.add(&scene.wrap(cube).unwrap()).unwrap();
    members.add(&scene.wrap(sphere).unwrap()).unwrap();

    let held = members.all().unwrap();
    assert_eq!(held.len(), 2);
    assert_eq!(held[0].id(), cube);
    assert_eq!(held[0].type_name(), "Model");

    // the far side runs through the built-in message attribute
    let sources = scene
        .graph()
        .connections(
            &PlugPath::root(selection.id(), "members").element(0),
            Direction::Incoming,
        )
        .unwrap();
    assert_eq!(sources, vec![PlugPath::root(cube, "message")]);

    // deleting a member drops it from the collection
    scene.graph().delete_node(cube).unwrap();
    assert_eq!(members.length().unwrap(), 1);
    assert_eq!(members.all().unwrap()[0].id(), sphere);
}

// ============================================================================
// 13. Untyped collections cannot create; target-bearing managers can
// ============================================================================

#[test]
fn test_manager_create_and_link() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();

    let joints = rig.relation("joints").unwrap();
    let spine = joints
        .create(CreateArgs::new().name("spine").set("side", 1))
        .unwrap();
    assert_eq!(spine.type_name(), "Joint");
    assert_eq!(spine.get("side").unwrap(), Value::Int(1));
    assert_eq!(joints.all().unwrap(), vec![spine.clone()]);

    let found = joints.get_or_create(CreateArgs::new()).unwrap();
    assert_eq!(found, spine);
    assert_eq!(joints.length().unwrap(), 1);

    scene
        .declare(ModelDef::new("util", "Selection").relation(Relation::collection("members")))
        .unwrap();
    let selection = scene.create("Selection", CreateArgs::new()).unwrap();
    assert!(matches!(
        selection.relation("members").unwrap().create(CreateArgs::new()),
        Err(Error::Usage(_))
    ));
}

// ============================================================================
// 14. Linking at creation through CreateArgs
// ============================================================================

#[test]
fn test_create_args_links() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();
    let hips = scene.create("Joint", CreateArgs::new().name("hips")).unwrap();

    let spine = scene
        .create(
            "Joint",
            CreateArgs::new().name("spine").link("parent", &hips),
        )
        .unwrap();
    assert_eq!(spine.related("parent").unwrap(), Some(hips.clone()));
    assert_eq!(rig.relation("joints").unwrap().length().unwrap(), 0);

    let linked = scene
        .create(
            "Rig",
            CreateArgs::new().link_many("joints", &[hips.clone(), spine.clone()]),
        )
        .unwrap();
    assert_eq!(
        linked.relation("joints").unwrap().all().unwrap(),
        vec![hips, spine]
    );
}

// ============================================================================
// 15. Deleting a node severs its edges everywhere
// ============================================================================

#[test]
fn test_delete_severs_links() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();
    let a = scene.create("Joint", CreateArgs::new()).unwrap();
    let b = scene.create("Joint", CreateArgs::new()).unwrap();

    let joints = rig.relation("joints").unwrap();
    joints.add(&a).unwrap();
    joints.add(&b).unwrap();

    a.delete().unwrap();

    assert_eq!(joints.all().unwrap(), vec![b]);
    assert!(matches!(
        a.relation("rig"),
        Ok(_) // manager construction works on a stale handle...
    ));
    // ...but queries through it fail
    assert!(matches!(
        a.relation("rig").unwrap().all(),
        Err(Error::Stale(_))
    ));
}

// ============================================================================
// 16. Undo and redo walk link edits as single batches
// ============================================================================

#[test]
fn test_undo_redo_link() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();
    let a = scene.create("Joint", CreateArgs::new()).unwrap();

    let joints = rig.relation("joints").unwrap();
    joints.add(&a).unwrap();
    assert_eq!(joints.length().unwrap(), 1);

    assert!(scene.undo().unwrap());
    assert_eq!(joints.length().unwrap(), 0);

    assert!(scene.redo().unwrap());
    assert_eq!(joints.all().unwrap(), vec![a]);
}

// ============================================================================
// 17. Undo restores a cascade-deleted subtree with its links
// ============================================================================

#[test]
fn test_undo_cascade_delete() {
    let scene = Scene::in_memory();
    scene.declare(ModelDef::new("rig", "Effector")).unwrap();
    scene
        .declare(
            ModelDef::new("rig", "Chain")
                .relation(Relation::new("effectors", "Effector").multi().cascade()),
        )
        .unwrap();

    let chain = scene.create("Chain", CreateArgs::new().name("leg")).unwrap();
    let eff = chain
        .relation("effectors")
        .unwrap()
        .create(CreateArgs::new().name("foot"))
        .unwrap();
    let (chain_id, eff_id) = (chain.id(), eff.id());

    chain.delete().unwrap();
    assert_eq!(scene.graph().node_count(), 0);

    // the cascade rode inside the delete's edit scope
    assert!(scene.undo().unwrap());
    assert!(scene.graph().node_exists(chain_id));
    assert!(scene.graph().node_exists(eff_id));

    let chain = scene.instance(chain_id).unwrap();
    let linked = chain.relation("effectors").unwrap().all().unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id(), eff_id);
}

// ============================================================================
// 18. Scoped edits group several links into one undo step
// ============================================================================

#[test]
fn test_edit_scope_groups_links() {
    let scene = rig_scene();
    let rig = scene.create("Rig", CreateArgs::new()).unwrap();
    let a = scene.create("Joint", CreateArgs::new()).unwrap();
    let b = scene.create("Joint", CreateArgs::new()).unwrap();

    let joints = rig.relation("joints").unwrap();
    {
        let scope = scene.edit("wire rig");
        joints.add(&a).unwrap();
        joints.add(&b).unwrap();
        scope.commit().unwrap();
    }
    assert_eq!(joints.length().unwrap(), 2);

    assert!(scene.undo().unwrap());
    assert_eq!(joints.length().unwrap(), 0);
}
