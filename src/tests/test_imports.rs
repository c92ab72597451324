// Copyright (C) 2024 Jelmer Vernooij <jelmer@samba.org>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cross-module collection through real files on disk.

use std::fs;
use std::path::Path;

use super::common::migrate_file;

const DEP_SOURCE: &str = r#"from sundown import replace_me

@replace_me(since="1.0.0")
def inc(x):
    return x + 1

def unrelated(y):
    return y
"#;

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn from_import_binds_the_replacement() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "dep.py", DEP_SOURCE);
    let app = write(dir.path(), "app.py", "from dep import inc\n\nresult = inc(3)\n");

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.unwrap().contains("result = 3 + 1"));
}

#[test]
fn import_alias_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "dep.py", DEP_SOURCE);
    let app = write(
        dir.path(),
        "app.py",
        "from dep import inc as increment\n\nresult = increment(3)\n",
    );

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.unwrap().contains("result = 3 + 1"));
}

#[test]
fn module_qualified_call_is_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "dep.py", DEP_SOURCE);
    let app = write(dir.path(), "app.py", "import dep\n\nresult = dep.inc(3)\n");

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.unwrap().contains("result = 3 + 1"));
}

#[test]
fn shadowed_import_is_not_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "dep.py", DEP_SOURCE);
    let app = write(
        dir.path(),
        "app.py",
        r#"from dep import inc

def inc(x):
    return x

result = inc(3)
"#,
    );

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.is_none());
}

#[test]
fn relative_import_inside_a_package() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pkg/__init__.py", "");
    write(dir.path(), "pkg/dep.py", DEP_SOURCE);
    let app = write(
        dir.path(),
        "pkg/app.py",
        "from .dep import inc\n\nresult = inc(10)\n",
    );

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.unwrap().contains("result = 10 + 1"));
}

#[test]
fn reexported_name_resolves_one_hop() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "origin.py", DEP_SOURCE);
    write(dir.path(), "facade.py", "from origin import inc\n");
    let app = write(
        dir.path(),
        "app.py",
        "from facade import inc\n\nresult = inc(5)\n",
    );

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.unwrap().contains("result = 5 + 1"));
}

#[test]
fn star_import_brings_markers_into_scope() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "dep.py", DEP_SOURCE);
    let app = write(dir.path(), "app.py", "from dep import *\n\nresult = inc(2)\n");

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.unwrap().contains("result = 2 + 1"));
}

#[test]
fn imported_class_brings_method_markers() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "client.py",
        r#"from sundown import replace_me

class Client:
    def new_fetch(self, url):
        return url

    @replace_me()
    def fetch(self, url):
        return self.new_fetch(url)
"#,
    );
    let app = write(
        dir.path(),
        "app.py",
        r#"from client import Client

c = Client()
c.fetch("u")
"#,
    );

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.unwrap().contains("c.new_fetch(\"u\")"));
}

#[test]
fn inherited_markers_follow_imported_subclass() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "base.py",
        r#"from sundown import replace_me

class Base:
    @replace_me()
    def old(self, n):
        return self.new(n)

class Special(Base):
    pass
"#,
    );
    let app = write(
        dir.path(),
        "app.py",
        r#"from base import Special

s = Special()
s.old(4)
"#,
    );

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.unwrap().contains("s.new(4)"));
}

#[test]
fn unresolvable_imports_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let app = write(
        dir.path(),
        "app.py",
        "from nowhere import thing\n\nthing(1)\n",
    );

    let outcome = migrate_file(&app, &[]);
    assert!(outcome.new_source.is_none());
    assert!(outcome.skipped.is_empty());
}
