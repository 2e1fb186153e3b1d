#[macro_use]
mod common;

#[cfg(test)]
mod import {
    use std::fs;

    use assert_cmd::Command;
    use tempfile::tempdir;

    tests! {
        uses_math in import is OK
        "36"
        "3.14159"
    }

    tests! {
        missing in import is ERR
        "Parser Error"
        "1:8 - invalid import"
    }

    tests! {
        private_member in import is ERR
        "Semantic Error"
        "undefined"
    }

    tests! {
        sub_selector in import is ERR
        "Parser Error"
        "1:8 - not implemented"
    }

    /// Cyclic imports terminate: each module sees the other's declaration
    /// headers and neither is parsed twice.
    #[test]
    fn cyclic_imports_resolve() {
        let lib = tempdir().unwrap();
        fs::write(
            lib.path().join("a.cb"),
            "import \"b\";\n\npublic func fa() int {\n    return 1;\n}\n",
        )
        .unwrap();
        // b references a's declaration header while a is still loading.
        fs::write(
            lib.path().join("b.cb"),
            "import \"a\";\n\npublic func fb() int {\n    return fa() + 1;\n}\n",
        )
        .unwrap();

        let main = lib.path().join("main.cb");
        fs::write(&main, "import \"a\";\n\nprintln(fa() + fb());\n").unwrap();

        Command::cargo_bin("cobble")
            .unwrap()
            .arg(main)
            .env("COBBLE_LIB", lib.path())
            .assert()
            .stdout("3\n")
            .success();
    }

    /// Diamond imports load the shared module once: its top-level side
    /// effect prints a single time.
    #[test]
    fn diamond_imports_load_once() {
        let lib = tempdir().unwrap();
        fs::write(lib.path().join("side.cb"), "println(\"side loaded\");\n").unwrap();
        fs::write(lib.path().join("c.cb"), "import \"side\";\n").unwrap();
        fs::write(lib.path().join("d.cb"), "import \"side\";\n").unwrap();

        let main = lib.path().join("main.cb");
        fs::write(&main, "import \"c\";\nimport \"d\";\nprintln(\"done\");\n").unwrap();

        Command::cargo_bin("cobble")
            .unwrap()
            .arg(main)
            .env("COBBLE_LIB", lib.path())
            .assert()
            .stdout("side loaded\ndone\n")
            .success();
    }

    /// An import failure is reported against the importing script, at the
    /// import directive's position.
    #[test]
    fn nested_import_failure_points_at_directive() {
        let lib = tempdir().unwrap();
        fs::write(lib.path().join("broken.cb"), "var x = missing;\n").unwrap();

        let main = lib.path().join("main.cb");
        fs::write(&main, "\nimport \"broken\";\n").unwrap();

        let assert = Command::cargo_bin("cobble")
            .unwrap()
            .arg(main)
            .env("COBBLE_LIB", lib.path())
            .assert()
            .failure();

        let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
        assert!(stdout.contains("2:8 - invalid import"), "got: {stdout:?}");
    }
}
