use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::{
    Error, FileStage, Item, ItemStream, Pipeline, Result, Stage, SharedWrite, as_source, feed,
    filt, items, list, map, null, set, shared_list, shared_set, stream_filter, uniq,
};

fn collect(stream: ItemStream) -> Vec<Item> {
    stream.collect::<Result<Vec<_>>>().unwrap()
}

fn texts(values: &[&str]) -> Vec<Item> {
    values.iter().map(|s| Item::from(*s)).collect()
}

#[test]
fn compose_is_associative() {
    let src = || items([1, 2, 3]);
    let double = || map(|x| if let Item::Int(i) = x { Item::Int(i * 2) } else { x });
    let incr = || map(|x| if let Item::Int(i) = x { Item::Int(i + 1) } else { x });

    let left = ((src() / double()) / incr()).collect_items().unwrap();
    let right = (src() / (double() / incr())).collect_items().unwrap();
    assert_eq!(left, right);
    assert_eq!(left, vec![Item::Int(3), Item::Int(5), Item::Int(7)]);
}

#[test]
fn construction_flattens() {
    let nested = (items(["a"]) / map(|x| x)) / (map(|x| x) / null());
    assert_eq!(nested.stages().len(), 4);
    let kinds: Vec<_> = nested.stages().iter().map(Stage::kind).collect();
    assert_eq!(kinds, ["items", "function", "function", "null"]);
}

#[test]
fn empty_pipeline_is_identity_filter() {
    let upstream = ItemStream::from_values(texts(&["x", "y"]));
    let out = Pipeline::new().apply(upstream).unwrap();
    assert_eq!(collect(out), texts(&["x", "y"]));
}

#[test]
fn empty_pipeline_iterates_empty() {
    assert_eq!(Pipeline::new().collect_items().unwrap(), vec![]);
}

#[test]
fn empty_pipeline_is_not_a_sink() {
    assert!(matches!(Pipeline::new().run(), Err(Error::EmptyPipeline)));
}

#[test]
fn filter_only_pipeline_is_incomplete() {
    let filters = Pipeline::new().pipe(stream_filter(|s| s));
    assert!(matches!(filters.stream(), Err(Error::IncompletePipeline)));
    assert!(matches!(filters.run(), Err(Error::IncompletePipeline)));
}

#[test]
fn single_stage_filter_folds_to_filt() {
    let stage = map(|x| Item::Text(format!("<{}>", x)));
    let via_pipeline = Pipeline::new()
        .pipe(stage.clone())
        .apply(ItemStream::from_values(texts(&["a"])))
        .unwrap();
    let via_filt = filt(&stage, ItemStream::from_values(texts(&["a"]))).unwrap();
    assert_eq!(collect(via_pipeline), collect(via_filt));
}

#[test]
fn iteration_is_single_pass_but_repeatable() {
    let pipeline = items(["a", "b"]) / map(|x| x);
    let first = collect(pipeline.stream().unwrap());
    let second = collect(pipeline.stream().unwrap());
    assert_eq!(first, texts(&["a", "b"]));
    assert_eq!(first, second);
}

#[test]
fn list_sink_replaces_contents() {
    let target = shared_list();
    target.lock().unwrap().push(Item::from("stale"));

    (items(["a", "b", "c"]) >> list(&target)).unwrap();
    assert_eq!(*target.lock().unwrap(), texts(&["a", "b", "c"]));

    // &SharedList works directly as the right-hand side as well.
    (items(["d"]) >> &target).unwrap();
    assert_eq!(*target.lock().unwrap(), texts(&["d"]));
}

#[test]
fn vec_sink_replaces_contents() {
    let mut target = vec![Item::from("stale")];
    (items([1, 2]) / map(|x| x) >> &mut target).unwrap();
    assert_eq!(target, vec![Item::Int(1), Item::Int(2)]);
}

#[test]
fn set_sink_replaces_contents() {
    let target = shared_set();
    target.lock().unwrap().insert(Item::from("stale"));
    (items(["a", "b", "a"]) >> set(&target)).unwrap();
    let expected: HashSet<Item> = texts(&["a", "b"]).into_iter().collect();
    assert_eq!(*target.lock().unwrap(), expected);

    let mut plain = HashSet::new();
    plain.insert(Item::from("stale"));
    (items(["x"]) >> &mut plain).unwrap();
    assert_eq!(plain, texts(&["x"]).into_iter().collect());
}

#[test]
fn null_sink_drains() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let count = map(move |x| {
        counter.fetch_add(1, Ordering::SeqCst);
        x
    });
    (items([1, 2, 3]) / count >> null()).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[test]
fn callable_sink_is_invoked_per_item() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_log = Arc::clone(&seen);
    let sink = map(move |x| {
        sink_log.lock().unwrap().push(x.clone());
        x
    });
    (items(["a", "b"]) >> sink).unwrap();
    assert_eq!(*seen.lock().unwrap(), texts(&["a", "b"]));
}

#[test]
fn writer_sink_serialises_non_text_items() {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let sink: SharedWrite = buf.clone();
    (items([Item::Text("raw".into()), Item::Int(7)]) >> Stage::Write(sink)).unwrap();
    assert_eq!(&*buf.lock().unwrap(), b"raw7\n");
}

#[test]
fn containers_are_also_sources() {
    let target = shared_list();
    *target.lock().unwrap() = texts(&["a", "b"]);
    let out = (Stage::List(Arc::clone(&target)) / map(|x| x))
        .collect_items()
        .unwrap();
    assert_eq!(out, texts(&["a", "b"]));
}

#[test]
fn bad_filter_is_rejected() {
    let err = filt(&items(["a"]), ItemStream::empty()).unwrap_err();
    assert!(matches!(err, Error::BadFilter("items")));
}

#[test]
fn bad_sink_is_rejected() {
    let err = feed(&items(["a"]), ItemStream::empty()).unwrap_err();
    assert!(matches!(err, Error::BadSink("items")));

    let run_err = (items(["a"]) / items(["b"])).run().unwrap_err();
    assert!(matches!(run_err, Error::BadSink("items")));
}

#[test]
fn source_dispatch_rejects_pure_sinks() {
    assert!(matches!(
        as_source(&null()),
        Err(Error::IncompletePipeline)
    ));
}

#[test]
fn file_round_trip_and_append() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("data");
    let file = FileStage::new(&path);

    (items(["one\n", "two\n"]) >> file.clone()).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");

    // The append sibling leaves existing content in place.
    (items(["three\n"]) >> file.appending()).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\nthree\n");

    // Truncating sink replaces it again.
    (items(["four\n"]) >> file.clone()).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "four\n");

    let lines = Pipeline::new().pipe(file).collect_items().unwrap();
    assert_eq!(lines, texts(&["four\n"]));
}

#[test]
fn uniq_drops_consecutive_duplicates() {
    let out = (items(["a", "a", "b", "b", "a"]) / uniq())
        .collect_items()
        .unwrap();
    assert_eq!(out, texts(&["a", "b", "a"]));
}

#[test]
fn stream_filters_may_change_cardinality() {
    let count = stream_filter(|stream| {
        let n = stream.count();
        ItemStream::from_values(vec![Item::Int(n as i64)])
    });
    let out = (items(["a", "b", "c"]) / count).collect_items().unwrap();
    assert_eq!(out, vec![Item::Int(3)]);
}

#[test]
fn run_feeds_last_stage() {
    let target = shared_list();
    let pipeline = items([10, 20]) / map(|x| x) / list(&target);
    pipeline.run().unwrap();
    assert_eq!(*target.lock().unwrap(), vec![Item::Int(10), Item::Int(20)]);
}

#[test]
fn newline_helpers_normalise_items() {
    let out = (items([Item::from("a"), Item::from("b\n"), Item::Int(3)]) / map(crate::nl))
        .collect_items()
        .unwrap();
    assert_eq!(out, texts(&["a\n", "b\n", "3\n"]));

    let stripped = (items(["x\n\n"]) / map(crate::stripnl)).collect_items().unwrap();
    assert_eq!(stripped, texts(&["x"]));
}

#[test]
fn write_to_collects_serialised_output() {
    let mut buf = Vec::new();
    (items(["x\n", "y\n"]) / map(|x| x))
        .write_to(&mut buf)
        .unwrap();
    assert_eq!(buf, b"x\ny\n");
}
