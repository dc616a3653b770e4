use flash_dex::{Address, Command, Engine, EngineConfig, MakeOrder, Transaction};
use hdrhistogram::Histogram;
use std::time::Instant;

const CONFIG: &str = r#"
    [exchange]
    address = "0xe0"
    fee_account = "0xfee"
    fee_percent = 10

    [[tokens]]
    token = "0xa1"
    holder = "0x01"
    supply = "1000000000000"
    decimals = 0

    [[tokens]]
    token = "0xa2"
    holder = "0x02"
    supply = "1000000000000"
    decimals = 0
"#;

const EXCHANGE: Address = Address::from_low_u64(0xe0);
const TOKEN_A: Address = Address::from_low_u64(0xa1);
const TOKEN_B: Address = Address::from_low_u64(0xa2);
const MAKER: Address = Address::from_low_u64(1);
const FILLER: Address = Address::from_low_u64(2);

fn main() {
    println!("Preparing Latency Benchmark...");

    // Setup: both sides fund custody up front.
    let config = EngineConfig::from_toml_str(CONFIG).expect("valid benchmark config");
    let mut engine = Engine::new(&config).expect("benchmark engine");
    let funding = [
        (MAKER, TOKEN_A),
        (FILLER, TOKEN_B),
    ];
    for (user, token) in funding {
        let amount = 1_000_000_000_000;
        let approve = Command::Approve { token, spender: EXCHANGE, amount };
        assert!(engine.process(Transaction { caller: user, timestamp: 0, command: approve }).is_success());
        let deposit = Command::Deposit { token, amount };
        assert!(engine.process(Transaction { caller: user, timestamp: 0, command: deposit }).is_success());
    }

    let mut histogram = Histogram::<u64>::new_with_bounds(1, 100_000, 3).unwrap();

    const ITERATIONS: u64 = 500_000;

    println!("Running {} make+fill cycles...", ITERATIONS);

    let mut total_duration = std::time::Duration::new(0, 0);

    for i in 0..ITERATIONS {
        let make = Transaction {
            caller: MAKER,
            timestamp: i,
            command: Command::MakeOrder(MakeOrder {
                token_get: TOKEN_B,
                amount_get: 10 + (i as u128 % 100),
                token_give: TOKEN_A,
                amount_give: 10,
            }),
        };
        let fill = Transaction {
            caller: FILLER,
            timestamp: i,
            command: Command::FillOrder { id: i + 1 },
        };

        // Critical measurement section
        let start = Instant::now();
        std::hint::black_box(engine.process(make));
        let made = start.elapsed();

        let start = Instant::now();
        std::hint::black_box(engine.process(fill));
        let filled = start.elapsed();

        histogram.record(made.as_nanos() as u64).unwrap_or(());
        histogram.record(filled.as_nanos() as u64).unwrap_or(());
        total_duration += made + filled;
    }

    let ops = ITERATIONS * 2;
    println!("\n=== Latency Report (ns) ===");
    println!("Total Ops:  {}", ops);
    println!("Throughput: {:.2} ops/sec", ops as f64 / total_duration.as_secs_f64());
    println!("---------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------");
    println!("Orders: {}", engine.order_count());

    println!("\nDistribution:");
    for v in histogram.iter_log(100, 2.0) {
        let count = v.count_since_last_iteration();
        if count > 0 {
            println!("<= {:6} ns: {:10} count", v.value_iterated_to(), count);
        }
    }
}
