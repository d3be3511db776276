use llir_opt::backend::TextualLowering;
use llir_opt::driver::Driver;

fn main() {
    let driver = match Driver::from_args(std::env::args()) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    let lowering = TextualLowering;
    match driver.run(&lowering) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}
