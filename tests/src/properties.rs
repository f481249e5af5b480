//! Match-rule properties
//!
//! Rule text survives a parse / print / parse cycle, and rule evaluation
//! agrees with a field-by-field reference on randomized inputs.

#[cfg(test)]
mod tests {
    use afbus_match::{parse, MatchMaker, MatchRule, MAX_ARG_INDEX};
    use afbus_types::{MessageHeader, MessageType};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const TYPES: [MessageType; 4] = [
        MessageType::MethodCall,
        MessageType::MethodReturn,
        MessageType::Error,
        MessageType::Signal,
    ];

    // =========================================================================
    // Rule text round trip
    // =========================================================================

    fn value_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_./:, -]{1,12}"
    }

    fn rule_text_strategy() -> impl Strategy<Value = String> {
        let ty = prop::option::of(prop::sample::select(TYPES.to_vec()));
        let field = || prop::option::of(value_strategy());
        let eavesdrop = prop::option::of(any::<bool>());
        let args = prop::collection::btree_map(0..=MAX_ARG_INDEX, value_strategy(), 0..4);

        (ty, field(), field(), field(), field(), field(), eavesdrop, args)
            .prop_map(
                |(ty, sender, interface, member, path, destination, eavesdrop, args)| {
                    let mut pairs = Vec::new();
                    if let Some(ty) = ty {
                        pairs.push(format!("type='{ty}'"));
                    }
                    let fields = [
                        ("sender", sender),
                        ("interface", interface),
                        ("member", member),
                        ("path", path),
                        ("destination", destination),
                    ];
                    for (key, value) in fields {
                        if let Some(value) = value {
                            pairs.push(format!("{key}='{value}'"));
                        }
                    }
                    if let Some(flag) = eavesdrop {
                        pairs.push(format!("eavesdrop='{flag}'"));
                    }
                    for (index, value) in args {
                        pairs.push(format!("arg{index}='{value}'"));
                    }
                    pairs
                },
            )
            .prop_flat_map(|pairs| Just(pairs).prop_shuffle())
            .prop_map(|pairs| pairs.join(","))
    }

    proptest! {
        #[test]
        fn rule_text_round_trips(text in rule_text_strategy()) {
            let rule = parse(&text).unwrap();
            let canonical = rule.to_string();
            let reparsed = parse(&canonical).unwrap();

            prop_assert_eq!(&rule, &reparsed);
            prop_assert_eq!(reparsed.to_string(), canonical);
        }
    }

    #[test]
    fn test_round_trip_keeps_separators_in_values() {
        let rule = parse("arg3='a, b',path='/x/y'").unwrap();
        let reparsed = parse(&rule.to_string()).unwrap();
        assert_eq!(reparsed.arg(3), Some("a, b"));
        assert_eq!(rule, reparsed);
    }

    // =========================================================================
    // Match truth table
    // =========================================================================

    const NAMES: [&str; 2] = ["org.a", "org.b"];
    const MEMBERS: [&str; 2] = ["Ping", "Pong"];
    const PATHS: [&str; 2] = ["/", "/obj"];
    const PEERS: [&str; 3] = [":0.1", ":0.2", "org.svc"];
    const ARGS: [&str; 2] = ["x", "y"];

    /// Plain description of a rule, evaluated independently of `MatchRule`.
    #[derive(Debug, Clone)]
    struct RuleShape {
        ty: Option<MessageType>,
        interface: Option<&'static str>,
        member: Option<&'static str>,
        path: Option<&'static str>,
        destination: Option<&'static str>,
        sender: Option<&'static str>,
        args: Vec<(usize, &'static str)>,
        eavesdrop: bool,
    }

    impl RuleShape {
        fn build(&self) -> MatchRule {
            let mut rule = MatchRule::new().with_eavesdrop(self.eavesdrop);
            if let Some(ty) = self.ty {
                rule = rule.with_type(ty);
            }
            if let Some(v) = self.interface {
                rule = rule.with_interface(v);
            }
            if let Some(v) = self.member {
                rule = rule.with_member(v);
            }
            if let Some(v) = self.path {
                rule = rule.with_path(v);
            }
            if let Some(v) = self.destination {
                rule = rule.with_destination(v);
            }
            if let Some(v) = self.sender {
                rule = rule.with_sender(v);
            }
            for (index, value) in &self.args {
                rule = rule.with_arg(*index, value);
            }
            rule
        }

        fn expected(&self, may_eavesdrop: bool, msg: &MessageHeader) -> bool {
            fn field(want: Option<&str>, have: &Option<String>) -> bool {
                want.map_or(true, |w| have.as_deref() == Some(w))
            }

            if self.eavesdrop && !may_eavesdrop {
                return false;
            }
            if msg.destination.is_some() && !self.eavesdrop {
                return false;
            }
            self.ty.map_or(true, |ty| ty == msg.msg_type)
                && field(self.interface, &msg.interface)
                && field(self.member, &msg.member)
                && field(self.path, &msg.path)
                && field(self.destination, &msg.destination)
                && field(self.sender, &msg.sender)
                && self
                    .args
                    .iter()
                    .all(|(i, v)| msg.arg(*i) == Some(*v))
        }
    }

    fn maybe(rng: &mut StdRng, options: &[&'static str]) -> Option<&'static str> {
        if rng.gen_bool(0.5) {
            None
        } else {
            Some(options[rng.gen_range(0..options.len())])
        }
    }

    fn random_rule(rng: &mut StdRng) -> RuleShape {
        let mut args = Vec::new();
        for index in 0..3 {
            if rng.gen_bool(0.25) {
                args.push((index, ARGS[rng.gen_range(0..ARGS.len())]));
            }
        }
        RuleShape {
            ty: rng
                .gen_bool(0.5)
                .then(|| TYPES[rng.gen_range(0..TYPES.len())]),
            interface: maybe(rng, &NAMES),
            member: maybe(rng, &MEMBERS),
            path: maybe(rng, &PATHS),
            destination: if rng.gen_bool(0.8) { None } else { maybe(rng, &PEERS) },
            sender: maybe(rng, &PEERS),
            args,
            eavesdrop: rng.gen_bool(0.2),
        }
    }

    fn random_message(rng: &mut StdRng) -> MessageHeader {
        let mut msg = MessageHeader::new(TYPES[rng.gen_range(0..TYPES.len())]);
        msg.interface = maybe(rng, &NAMES).map(str::to_string);
        msg.member = maybe(rng, &MEMBERS).map(str::to_string);
        msg.path = maybe(rng, &PATHS).map(str::to_string);
        msg.destination = if rng.gen_bool(0.7) {
            None
        } else {
            maybe(rng, &PEERS).map(str::to_string)
        };
        msg.sender = maybe(rng, &PEERS).map(str::to_string);
        msg.args = (0..rng.gen_range(0..4))
            .map(|_| maybe(rng, &ARGS).map(str::to_string))
            .collect();
        msg
    }

    fn random_cases(seed: u64, count: usize) -> Vec<(RuleShape, bool, MessageHeader)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let rule = random_rule(&mut rng);
                let may_eavesdrop = rng.gen_bool(0.5);
                let msg = random_message(&mut rng);
                (rule, may_eavesdrop, msg)
            })
            .collect()
    }

    #[test]
    fn test_matches_agrees_with_reference() {
        let cases = random_cases(0xAF_B05, 5000);
        let mut hits = 0;
        for (shape, may_eavesdrop, msg) in &cases {
            let rule = shape.build();
            let expected = shape.expected(*may_eavesdrop, msg);
            assert_eq!(
                rule.matches(None, *may_eavesdrop, msg),
                expected,
                "rule {rule} against {msg:?} (eavesdrop allowed: {may_eavesdrop})"
            );
            hits += usize::from(expected);
        }
        // The alphabets are small enough that both outcomes show up.
        assert!(hits > 0 && hits < cases.len());
    }

    #[test]
    fn test_matchmaker_agrees_with_reference() {
        for (shape, may_eavesdrop, msg) in random_cases(7, 2000) {
            let mut maker = MatchMaker::new(":9.9");
            maker.add_rule(shape.build());
            assert_eq!(
                maker.filter(None, may_eavesdrop, &msg),
                shape.expected(may_eavesdrop, &msg)
            );
        }
    }

    #[test]
    fn test_matches_independent_of_evaluation_order() {
        let cases = random_cases(42, 1000);
        let rules: Vec<MatchRule> = cases.iter().map(|(shape, _, _)| shape.build()).collect();

        let forward: Vec<bool> = cases
            .iter()
            .zip(&rules)
            .map(|((_, e, msg), rule)| rule.matches(None, *e, msg))
            .collect();
        let mut backward: Vec<bool> = cases
            .iter()
            .zip(&rules)
            .rev()
            .map(|((_, e, msg), rule)| rule.matches(None, *e, msg))
            .collect();
        backward.reverse();

        assert_eq!(forward, backward);

        let again: Vec<bool> = random_cases(42, 1000)
            .iter()
            .map(|(shape, e, msg)| shape.build().matches(None, *e, msg))
            .collect();
        assert_eq!(forward, again);
    }
}
