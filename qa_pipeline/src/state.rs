use state_machines::state_machine;

state_machine! {
    name: AskMachine,
    state: AskState,
    initial: Normalized,
    states: [Normalized, Embedded, HitHighQuality, HitBelowQuality, Miss, Generating, Admitting, Returned, Errored],
    events {
        embed { transition: { from: Normalized, to: Embedded } }
        hit_high { transition: { from: Embedded, to: HitHighQuality } }
        hit_below { transition: { from: Embedded, to: HitBelowQuality } }
        miss { transition: { from: Embedded, to: Miss } }
        generate {
            transition: { from: HitBelowQuality, to: Generating }
            transition: { from: Miss, to: Generating }
        }
        admit { transition: { from: Generating, to: Admitting } }
        finish {
            transition: { from: HitHighQuality, to: Returned }
            transition: { from: Admitting, to: Returned }
            transition: { from: Generating, to: Returned }
        }
        abort {
            transition: { from: Normalized, to: Errored }
            transition: { from: Embedded, to: Errored }
            transition: { from: HitHighQuality, to: Errored }
            transition: { from: HitBelowQuality, to: Errored }
            transition: { from: Miss, to: Errored }
            transition: { from: Generating, to: Errored }
            transition: { from: Admitting, to: Errored }
        }
    }
}

pub fn ready() -> AskMachine<(), Normalized> {
    AskMachine::new(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_quality_hit_reaches_returned() {
        let machine = ready();
        let machine = machine.embed().expect("embed");
        let machine = machine.hit_high().expect("hit_high");
        machine.finish().expect("finish");
    }

    #[test]
    fn miss_then_generate_then_admit_reaches_returned() {
        let machine = ready();
        let machine = machine.embed().expect("embed");
        let machine = machine.miss().expect("miss");
        let machine = machine.generate().expect("generate");
        let machine = machine.admit().expect("admit");
        machine.finish().expect("finish");
    }

    #[test]
    fn generation_failure_can_abort_without_admit() {
        let machine = ready();
        let machine = machine.embed().expect("embed");
        let machine = machine.hit_below().expect("hit_below");
        let machine = machine.generate().expect("generate");
        machine.abort().expect("abort");
    }
}
