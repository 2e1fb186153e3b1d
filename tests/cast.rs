#[macro_use]
mod common;

#[cfg(test)]
mod cast {
    tests! {
        casts in cast is OK
        "3"
        "2"
        "12!"
        "42"
        "2.5"
    }

    tests! {
        invalid_target in cast is ERR
        "Semantic Error"
        "invalid cast"
    }

    tests! {
        unparseable in cast is ERR
        "Runtime Error"
        "invalid cast"
    }
}
