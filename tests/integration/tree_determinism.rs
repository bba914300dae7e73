use chrono::Utc;
use filesync::tree::build_tree;
use filesync::FileMetadata;
use proptest::prelude::*;

fn file(path: &str) -> FileMetadata {
    FileMetadata {
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        size: 1,
        is_dir: false,
        mod_time: Utc::now(),
        hash: None,
    }
}

#[test]
fn directories_sort_before_files() {
    let entries = vec![file("b.txt"), file("a/x.txt"), file("A.md")];
    let tree = build_tree(&entries);
    let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["a", "A.md", "b.txt"]);
    assert!(tree[0].is_dir);
    assert_eq!(tree[0].children[0].path, "a/x.txt");
}

proptest! {
    #[test]
    fn tree_is_independent_of_input_order(
        (paths, shuffled) in prop::collection::btree_set("[a-c]{1,2}(/[a-c]{1,2}){0,2}", 1..12)
            .prop_flat_map(|set| {
                let paths: Vec<String> = set.into_iter().collect();
                (Just(paths.clone()), Just(paths).prop_shuffle())
            })
    ) {
        let ordered: Vec<_> = paths.iter().map(|p| file(p)).collect();
        let reordered: Vec<_> = shuffled.iter().map(|p| file(p)).collect();
        prop_assert_eq!(build_tree(&ordered), build_tree(&reordered));
    }
}
