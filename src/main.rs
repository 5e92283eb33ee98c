#[launch]
fn rocket() -> _ {
    alert_engine::rocket()
}
