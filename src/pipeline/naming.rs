//! Output naming: one filesystem-safe directory name per test item.
//!
//! Names are the item path relative to the common prefix of all items, with path separators and other unsafe
//! characters replaced by `_`. Overlong names keep a short head and a longer tail. That collapse is lossy; two
//! items that differ only in the dropped middle end up with the same name and share an output directory.

use std::path::{Component, Path, PathBuf};

use testrig_core::TestItem;

/// Names longer than this many characters are collapsed.
pub const MAX_OUTPUT_NAME_LEN: usize = 150;
const KEPT_PREFIX_LEN: usize = 15;
const KEPT_SUFFIX_LEN: usize = 45;
const ELLIPSIS: &str = "...";

const UNSAFE_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Pair every path with its output base name.
///
/// With a single item the prefix is shared with `cwd` instead, so a lone `tests/foo.rs` becomes `tests_foo.rs`
/// rather than an empty name.
pub fn assign_output_names(paths: Vec<PathBuf>, cwd: &Path) -> Vec<TestItem> {
    let prefix = match paths.as_slice() {
        [] => return Vec::new(),
        [only] => {
            let absolute = if only.is_absolute() { only.clone() } else { cwd.join(only) };
            common_prefix(&[absolute, cwd.to_path_buf()])
        }
        many => common_prefix(many),
    };

    paths
        .into_iter()
        .map(|path| {
            let name = output_base_name(&path, &prefix, cwd);
            TestItem::new(path, name)
        })
        .collect()
}

fn output_base_name(path: &Path, prefix: &Path, cwd: &Path) -> String {
    let absolute;
    let path = if prefix.is_absolute() && !path.is_absolute() {
        absolute = cwd.join(path);
        absolute.as_path()
    } else {
        path
    };

    let relative = path.strip_prefix(prefix).unwrap_or(path);
    let relative = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");

    let relative = if relative.is_empty() {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "item".to_string())
    } else {
        relative
    };

    truncate_name(&sanitize_name(&relative))
}

/// Longest component-wise common prefix of `paths`.
pub fn common_prefix(paths: &[PathBuf]) -> PathBuf {
    let Some((first, rest)) = paths.split_first() else {
        return PathBuf::new();
    };

    let mut shared: Vec<Component<'_>> = first.components().collect();
    for path in rest {
        let matching = shared
            .iter()
            .zip(path.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        shared.truncate(matching);
    }
    shared.into_iter().collect()
}

/// Replace characters that are not allowed in file names.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Collapse names over [`MAX_OUTPUT_NAME_LEN`] characters to `head...tail`.
pub fn truncate_name(name: &str) -> String {
    let count = name.chars().count();
    if count <= MAX_OUTPUT_NAME_LEN {
        return name.to_string();
    }

    let head: String = name.chars().take(KEPT_PREFIX_LEN).collect();
    let tail: String = name.chars().skip(count - KEPT_SUFFIX_LEN).collect();
    format!("{head}{ELLIPSIS}{tail}")
}
