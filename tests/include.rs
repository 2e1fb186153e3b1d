#[macro_use]
mod common;

#[cfg(test)]
mod include {
    use std::fs;

    use assert_cmd::Command;
    use tempfile::tempdir;

    tests! {
        main in include is OK
        "from util"
        "from util"
    }

    tests! {
        missing in include is ERR
        "Parser Error"
        "1:9 - invalid import"
    }

    /// Includes resolve against the including script's own directory,
    /// not the working directory.
    #[test]
    fn include_resolves_relative_to_script() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();

        fs::write(nested.join("part.cb"), "var shared = 41;\n").unwrap();
        let main = nested.join("main.cb");
        fs::write(&main, "include \"part.cb\";\n\nprintln(shared + 1);\n").unwrap();

        Command::cargo_bin("cobble")
            .unwrap()
            .arg(main)
            .env("COBBLE_LIB", dir.path().join("lib"))
            .assert()
            .stdout("42\n")
            .success();
    }

    /// Mutual includes terminate and both files compile once.
    #[test]
    fn cyclic_includes_resolve() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.cb"),
            "include \"b.cb\";\n\nfunc fa() int {\n    return 20;\n}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.cb"),
            "include \"a.cb\";\n\nfunc fb() int {\n    return 22;\n}\n",
        )
        .unwrap();

        let main = dir.path().join("main.cb");
        fs::write(&main, "include \"a.cb\";\n\nprintln(fa() + fb());\n").unwrap();

        Command::cargo_bin("cobble")
            .unwrap()
            .arg(main)
            .env("COBBLE_LIB", dir.path().join("lib"))
            .assert()
            .stdout("42\n")
            .success();
    }
}
