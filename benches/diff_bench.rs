//! Criterion benchmarks for the diff hot paths.
//!
//! Run with:
//!   cargo bench
//!
//! Covers:
//!   - Tree walking (walkdir over a synthetic source tree)
//!   - Byte-exact file comparison
//!   - Cache/project correlation (property-index driven pairing)

use std::path::{Path, PathBuf};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use orgd::cache::props::FileProperties;
use orgd::component::{Component, ComponentKey};
use orgd::conflict::correlate_results;
use orgd::diff::{count_files, files_differ, walk};

// ─── Tree walking ────────────────────────────────────────────────────────────

/// `dirs` directories of `files_per_dir` small class files each.
fn synthetic_tree(dirs: usize, files_per_dir: usize) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for d in 0..dirs {
        let dir = tmp.path().join(format!("classes{d}"));
        std::fs::create_dir_all(&dir).unwrap();
        for f in 0..files_per_dir {
            std::fs::write(
                dir.join(format!("Class{f}.cls")),
                format!("public class Class{f} {{ /* {d} */ }}"),
            )
            .unwrap();
        }
    }
    tmp
}

fn bench_walk(c: &mut Criterion) {
    let tree = synthetic_tree(20, 10);

    c.bench_function("walk_200_files", |b| {
        b.iter(|| {
            let mut names = Vec::with_capacity(200);
            walk(black_box(tree.path()), |visit| {
                names.push(visit.filename.clone());
                Ok(())
            })
            .unwrap();
            black_box(names);
        });
    });

    c.bench_function("count_200_files", |b| {
        b.iter(|| {
            let n = count_files(black_box(tree.path())).unwrap();
            black_box(n);
        });
    });
}

// ─── File comparison ─────────────────────────────────────────────────────────

fn bench_compare(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let body = "public class Big { }\n".repeat(200); // ~4 KiB
    let equal_a = tmp.path().join("EqualA.cls");
    let equal_b = tmp.path().join("EqualB.cls");
    let changed = tmp.path().join("Changed.cls");
    std::fs::write(&equal_a, &body).unwrap();
    std::fs::write(&equal_b, &body).unwrap();
    std::fs::write(&changed, body.replace("Big", "Bug")).unwrap();

    c.bench_function("compare_equal_4k", |b| {
        b.iter(|| {
            let differ = files_differ(black_box(&equal_a), black_box(&equal_b)).unwrap();
            black_box(differ);
        });
    });

    c.bench_function("compare_changed_4k", |b| {
        b.iter(|| {
            let differ = files_differ(black_box(&equal_a), black_box(&changed)).unwrap();
            black_box(differ);
        });
    });
}

// ─── Correlation ─────────────────────────────────────────────────────────────

fn class(base: &Path, name: &str) -> Component {
    Component {
        full_name: name.to_string(),
        type_name: "ApexClass".to_string(),
        content: Some(base.join(format!("classes/{name}.cls"))),
        xml: Some(base.join(format!("classes/{name}.cls-meta.xml"))),
        parent: None,
    }
}

fn field(base: &Path, object: &str, name: &str) -> Component {
    Component {
        full_name: name.to_string(),
        type_name: "CustomField".to_string(),
        content: None,
        xml: Some(base.join(format!("objects/{object}/fields/{name}.field-meta.xml"))),
        parent: Some(ComponentKey::new("CustomObject", object)),
    }
}

fn props(type_name: &str, name: &str) -> FileProperties {
    FileProperties {
        full_name: name.to_string(),
        type_name: type_name.to_string(),
        last_modified_date: "2026-08-20T09:00:00.000Z".to_string(),
        id: None,
        file_name: None,
        created_by_name: None,
        last_modified_by_name: None,
    }
}

fn bench_correlate(c: &mut Criterion) {
    let cache_base = PathBuf::from("/cache");
    let project_base = PathBuf::from("/project");

    // 100 classes plus 5 objects of 20 fields each, mirrored on both sides.
    let mut cache = Vec::new();
    let mut project = Vec::new();
    let mut properties = Vec::new();
    for i in 0..100 {
        let name = format!("Class{i}");
        cache.push(class(&cache_base, &name));
        project.push(class(&project_base, &name));
        properties.push(props("ApexClass", &name));
    }
    for o in 0..5 {
        let object = format!("Object{o}");
        properties.push(props("CustomObject", &object));
        for f in 0..20 {
            let name = format!("Field{f}");
            cache.push(field(&cache_base, &object, &name));
            project.push(field(&project_base, &object, &name));
        }
    }

    c.bench_function("correlate_100_classes_100_fields", |b| {
        b.iter(|| {
            let pairs = correlate_results(
                black_box(&cache),
                black_box(&properties),
                black_box(&project),
            );
            black_box(pairs);
        });
    });
}

// ─── Entry point ─────────────────────────────────────────────────────────────

criterion_group!(benches, bench_walk, bench_compare, bench_correlate);
criterion_main!(benches);
