//! End-to-end tests for type and relation managers: bulk queries,
//! `attr__op` filter keys, and first-match lookups.

use metanode::{CreateArgs, Error, Field, ModelDef, Relation, Scene, Value};

fn farm_scene() -> Scene {
    let scene = Scene::in_memory();
    scene
        .declare(
            ModelDef::new("farm", "Task")
                .field(Field::integer("priority").default(50))
                .field(Field::float("weight").default(1.0))
                .field(Field::string("status").default("queued"))
                .field(Field::boolean("done").default(false)),
        )
        .unwrap();
    scene
        .declare(
            ModelDef::new("farm", "Worker")
                .relation(Relation::new("tasks", "Task").multi()),
        )
        .unwrap();
    scene
}

fn seed_tasks(scene: &Scene) -> Vec<metanode::Instance> {
    let tasks = scene.manager("Task").unwrap();
    vec![
        tasks
            .create(CreateArgs::new().name("comp").set("priority", 10))
            .unwrap(),
        tasks
            .create(
                CreateArgs::new()
                    .name("light")
                    .set("priority", 50)
                    .set("status", "running"),
            )
            .unwrap(),
        tasks
            .create(
                CreateArgs::new()
                    .name("fx")
                    .set("priority", 90)
                    .set("weight", 2.5),
            )
            .unwrap(),
    ]
}

// ============================================================================
// 1. all() walks instances in creation order
// ============================================================================

#[test]
fn test_all_in_creation_order() {
    let scene = farm_scene();
    let seeded = seed_tasks(&scene);

    let tasks = scene.manager("Task").unwrap();
    assert_eq!(tasks.all().unwrap(), seeded);
    assert_eq!(tasks.length().unwrap(), 3);

    // the scene-level view agrees
    assert_eq!(scene.objects_typed("Task").unwrap(), seeded);
}

// ============================================================================
// 2. Plain keys filter on equality, defaults included
// ============================================================================

#[test]
fn test_filter_equality() {
    let scene = farm_scene();
    let seeded = seed_tasks(&scene);

    let tasks = scene.manager("Task").unwrap();
    let queued = tasks
        .filter(&[("status", Value::from("queued"))])
        .unwrap();
    assert_eq!(queued, vec![seeded[0].clone(), seeded[2].clone()]);

    // an explicit __eq spells the same thing
    let running = tasks
        .filter(&[("status__eq", Value::from("running"))])
        .unwrap();
    assert_eq!(running, vec![seeded[1].clone()]);

    let none = tasks.filter(&[("done", Value::Bool(true))]).unwrap();
    assert!(none.is_empty());
}

// ============================================================================
// 3. Ordering operators, numeric across Int and Float
// ============================================================================

#[test]
fn test_filter_ordering() {
    let scene = farm_scene();
    let seeded = seed_tasks(&scene);
    let tasks = scene.manager("Task").unwrap();

    let urgent = tasks.filter(&[("priority__gt", Value::Int(50))]).unwrap();
    assert_eq!(urgent, vec![seeded[2].clone()]);

    let cheap = tasks.filter(&[("priority__le", Value::Int(50))]).unwrap();
    assert_eq!(cheap, vec![seeded[0].clone(), seeded[1].clone()]);

    // a float bound against an integer field still orders
    let low = tasks
        .filter(&[("priority__lt", Value::Float(10.5))])
        .unwrap();
    assert_eq!(low, vec![seeded[0].clone()]);

    let heavy = tasks.filter(&[("weight__ge", Value::Int(2))]).unwrap();
    assert_eq!(heavy, vec![seeded[2].clone()]);
}

// ============================================================================
// 4. Mismatched types: never equal, never ordered
// ============================================================================

#[test]
fn test_filter_type_mismatch() {
    let scene = farm_scene();
    seed_tasks(&scene);
    let tasks = scene.manager("Task").unwrap();

    // a string never equals an int, so __ne matches everything
    assert!(tasks.filter(&[("status", Value::Int(1))]).unwrap().is_empty());
    assert_eq!(
        tasks.filter(&[("status__ne", Value::Int(1))]).unwrap().len(),
        3
    );

    // and mismatched operands never order
    assert!(tasks
        .filter(&[("status__gt", Value::Int(1))])
        .unwrap()
        .is_empty());
}

// ============================================================================
// 5. Bad filter keys are configuration errors
// ============================================================================

#[test]
fn test_filter_bad_keys() {
    let scene = farm_scene();
    seed_tasks(&scene);
    let tasks = scene.manager("Task").unwrap();

    assert!(matches!(
        tasks.filter(&[("priority__near", Value::Int(1))]),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        tasks.filter(&[("no_such_field", Value::Int(1))]),
        Err(Error::Config(_))
    ));
}

// ============================================================================
// 6. get() takes the first match, or nothing
// ============================================================================

#[test]
fn test_get_first_match() {
    let scene = farm_scene();
    let seeded = seed_tasks(&scene);
    let tasks = scene.manager("Task").unwrap();

    let fx = tasks.get(&[("priority", Value::Int(90))]).unwrap();
    assert_eq!(fx, Some(seeded[2].clone()));

    // creation order picks the winner out of several matches
    let queued = tasks.get(&[("status", Value::from("queued"))]).unwrap();
    assert_eq!(queued, Some(seeded[0].clone()));

    assert_eq!(tasks.get(&[("priority", Value::Int(999))]).unwrap(), None);

    // the node name is a filter key like any field
    let light = tasks.get(&[("name", Value::from("light"))]).unwrap();
    assert_eq!(light, Some(seeded[1].clone()));
}

// ============================================================================
// 7. Relation managers filter only what is linked
// ============================================================================

#[test]
fn test_relation_filter_scoped_to_links() {
    let scene = farm_scene();
    let seeded = seed_tasks(&scene);

    let worker = scene.create("Worker", CreateArgs::new()).unwrap();
    let assigned = worker.relation("tasks").unwrap();
    assigned.add(&seeded[0]).unwrap();
    assigned.add(&seeded[2]).unwrap();

    // seeded[1] is queued-adjacent noise the link filter must not see
    let mine = assigned
        .filter(&[("status", Value::from("queued"))])
        .unwrap();
    assert_eq!(mine, vec![seeded[0].clone(), seeded[2].clone()]);

    let urgent = assigned
        .filter(&[("priority__ge", Value::Int(50))])
        .unwrap();
    assert_eq!(urgent, vec![seeded[2].clone()]);

    assert!(assigned.contains(&seeded[0]).unwrap());
    assert!(!assigned.contains(&seeded[1]).unwrap());
}

// ============================================================================
// 8. Relation iterators stream links without collecting the whole set
// ============================================================================

#[test]
fn test_relation_iter_streams() {
    let scene = farm_scene();
    let seeded = seed_tasks(&scene);

    let worker = scene.create("Worker", CreateArgs::new()).unwrap();
    let assigned = worker.relation("tasks").unwrap();
    for task in &seeded {
        assigned.add(task).unwrap();
    }

    let mut iter = assigned
        .filter_iter(&[("priority__lt", Value::Int(80))])
        .unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), seeded[0]);
    assert_eq!(iter.next().unwrap().unwrap(), seeded[1]);
    assert!(iter.next().is_none());

    // plain iteration walks slots in order
    let names: Vec<String> = assigned
        .all_iter()
        .unwrap()
        .map(|task| task.unwrap().name().unwrap())
        .collect();
    assert_eq!(names, vec!["comp", "light", "fx"]);
}

// ============================================================================
// 9. get_or_create() keyed by node name, scoped to the manager's view
// ============================================================================

#[test]
fn test_get_or_create_by_name() {
    let scene = farm_scene();
    let tasks = scene.manager("Task").unwrap();

    let first = tasks
        .get_or_create("roto", CreateArgs::new().set("priority", 5))
        .unwrap();
    assert_eq!(first.get("priority").unwrap(), Value::Int(5));

    // a second call finds the instance and ignores the creation args
    let again = tasks
        .get_or_create("roto", CreateArgs::new().set("priority", 99))
        .unwrap();
    assert_eq!(again, first);
    assert_eq!(again.get("priority").unwrap(), Value::Int(5));
    assert_eq!(tasks.length().unwrap(), 1);

    // a name worn by another type is invisible here; the fresh task
    // lands on a bumped name instead
    scene.create("Worker", CreateArgs::new().name("mixed")).unwrap();
    let task = tasks.get_or_create("mixed", CreateArgs::new()).unwrap();
    assert_eq!(task.type_name(), "Task");
    assert_eq!(task.name().unwrap(), "mixed1");
    assert_eq!(tasks.length().unwrap(), 2);
}

// ============================================================================
// 10. Exact managers exclude subtypes; typed managers fold them in
// ============================================================================

#[test]
fn test_exact_vs_typed_manager() {
    let scene = farm_scene();
    scene
        .declare(
            ModelDef::new("farm", "RenderTask")
                .extends("Task")
                .field(Field::integer("chunk").default(8)),
        )
        .unwrap();
    let seeded = seed_tasks(&scene);
    let render = scene
        .create("RenderTask", CreateArgs::new().name("beauty"))
        .unwrap();

    let exact = scene.manager("Task").unwrap();
    assert!(!exact.is_typed());
    assert_eq!(exact.all().unwrap(), seeded);

    let typed = scene.manager_typed("Task").unwrap();
    assert!(typed.is_typed());
    assert_eq!(typed.length().unwrap(), 4);
    assert_eq!(typed.get(&[("name", Value::from("beauty"))]).unwrap(), Some(render.clone()));

    // the scene-level view is the typed one
    assert!(scene.objects_typed("Task").unwrap().contains(&render));

    // a subtype manager sees only its own
    assert_eq!(scene.manager("RenderTask").unwrap().all().unwrap(), vec![render]);
}

// ============================================================================
// 11. Managers for unknown types fail up front
// ============================================================================

#[test]
fn test_unknown_type_manager() {
    let scene = farm_scene();
    assert!(matches!(scene.manager("Ghost"), Err(Error::Config(_))));
    assert!(matches!(scene.manager_typed("Ghost"), Err(Error::Config(_))));
    assert!(matches!(scene.objects_typed("Ghost"), Err(Error::Config(_))));
}
