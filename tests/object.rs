#[macro_use]
mod common;

#[cfg(test)]
mod object {
    tests! {
        point in object is OK
        "7"
        "3"
        "34"
    }

    tests! {
        extends in object is OK
        "Rex makes a sound"
    }

    tests! {
        override_method in object is OK
        "woof"
    }

    tests! {
        duplicate in object is ERR
        "Semantic Error"
        "3:5 - duplicate member"
    }
}
