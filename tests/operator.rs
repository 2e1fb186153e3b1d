#[macro_use]
mod common;

#[cfg(test)]
mod operator {
    tests! {
        arithmetic in operator is OK
        "3"
        "3"
        "1"
        "3"
        "-5"
    }

    tests! {
        strings in operator is OK
        "a1b"
        "3"
        "a1b true"
        "4.5"
    }

    tests! {
        compare in operator is OK
        "true"
        "true"
        "true"
        "false"
        "true"
    }

    tests! {
        arrays in operator is OK
        "20"
        "3"
        "5"
        "35"
    }
}
