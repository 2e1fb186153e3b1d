#[macro_use]
mod common;

#[cfg(test)]
mod function {
    tests! {
        call in function is OK
        "42"
    }

    tests! {
        forward in function is OK
        "1"
    }

    tests! {
        recursion in function is OK
        "55"
    }

    tests! {
        variadic in function is OK
        "3"
    }

    tests! {
        arity in function is ERR
        "Semantic Error"
        "type mismatch"
    }

    tests! {
        stdlib in function is OK
        "7"
        "2"
        "4"
        "ababab"
    }
}
