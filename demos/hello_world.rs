use waypoint::{json, App, Config, Routable, Router};

fn main() {
    waypoint::logging::init("waypoint=debug");

    let config = Config {
        server_header: "waypoint".into(),
        ..Config::default()
    };
    let mut app = App::with_config(config);

    app.middleware("/", |c| {
        c.set("X-Powered-By", "waypoint");
        c.next()
    });
    app.get("/", |c| c.send_string("Hello, World!"));

    let mut users = Router::new();
    users
        .get("/", |c| c.json(&json!([{ "id": 1 }, { "id": 2 }])))
        .get("/:id", |c| {
            let id = c.param("id").to_owned();
            c.json(&json!({ "id": id }))
        });
    app.mount("/users", users);

    if let Err(e) = app.listen("127.0.0.1:3000") {
        eprintln!("server error: {}", e);
    }
}
