//! Words defined in forth itself, interpreted once at bootstrap.

pub(crate) const PRELUDE: &[&str] = &[
    // control flow. `if` and `until` lay down `lit <addr> 0jmp?`, `else` and
    // `again` lay down `lit <addr> jmp`; forward targets are patched by
    // whoever closes the construct.
    ": if lit lit , here 0 , lit 0jmp? , ; immediate",
    ": then here swap ! ; immediate",
    ": else lit lit , here 0 , lit jmp , swap here swap ! ; immediate",
    ": begin here ; immediate",
    ": again lit lit , , lit jmp , ; immediate",
    ": until lit lit , , lit 0jmp? , ; immediate",
    // stack
    ": nip swap drop ;",
    ": 2dup over over ;",
    ": negate 0 swap - ;",
    ": <> = 0= ;",
    // output
    ": cr 10 emit ;",
    ": space 32 emit ;",
    ": (type) dup 0= if drop drop drop exit then >r over over +c@ emit 1+ r> 1- (type) ;",
    ": type dup @ swap 1+ 0 rot (type) ;",
    ": count dup 1+ swap @ ;",
    ": . >string type space ;",
    ": u. u>string type space ;",
    // numeric base of the running task
    ": base uram 1+ ;",
    ": decimal 10 base ! ;",
    ": hex 16 base ! ;",
    ": binary 2 base ! ;",
    // definitions
    ": variable (create) lit dlit , (allot1) d, lit exit , ;",
    ": constant (create) lit dlit , d, lit exit , ;",
    ": ' next-word (find-code) ;",
];
