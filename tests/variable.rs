#[macro_use]
mod common;

#[cfg(test)]
mod variable {
    tests! {
        initializer in variable is OK
        "3"
    }

    tests! {
        typed in variable is OK
        "answer 42"
    }

    tests! {
        type_mismatch in variable is ERR
        "Semantic Error"
        "1:11 - type mismatch"
    }

    tests! {
        undefined in variable is ERR
        "Semantic Error"
        "1:9 - undefined"
    }

    tests! {
        shadow in variable is OK
        "inner"
        "outer"
    }

    tests! {
        uninitialized in variable is OK
        "null"
    }
}
