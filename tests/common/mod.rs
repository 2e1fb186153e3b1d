#[macro_export]
macro_rules! tests {
    ($file:ident in $scope:ident is OK $($expected:expr)*) => {
        #[test]
        fn $file() {
            use assert_cmd::Command;

            let expected = vec![$($expected),*];

            // if exists, concat expected lines with new lines
            let expected = match expected.len() {
                0 => "".to_string(),
                _ => expected.join("\n") + "\n",
            };

            let file = format!("tests/target/{}/{}.cb", stringify!($scope), stringify!($file));

            Command::cargo_bin("cobble").unwrap()
                .arg(file)
                .env("COBBLE_LIB", "tests/target/lib")
                .assert()
                .stdout(expected)
                .success();
        }
    };

    ($file:ident in $scope:ident is ERR $($expected:expr)+) => {
        #[test]
        fn $file() {
            use assert_cmd::Command;

            let file = format!("tests/target/{}/{}.cb", stringify!($scope), stringify!($file));

            let assert = Command::cargo_bin("cobble").unwrap()
                .arg(file)
                .env("COBBLE_LIB", "tests/target/lib")
                .assert()
                .failure();

            // diagnostics go to stdout, with the phase prefix
            let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
            $(
                assert!(
                    stdout.contains($expected),
                    "expected {:?} in output: {stdout:?}",
                    $expected,
                );
            )+
        }
    };
}
