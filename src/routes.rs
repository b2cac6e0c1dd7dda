/// Every screen the application can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    SignIn,
    SignUp,
    ResetPassword,
    Home,
    Profile,
    Settings,
    CreatePost,
    MyPosts,
    Favorites,
}

impl Route {
    pub const ALL: [Route; 9] = [
        Route::SignIn,
        Route::SignUp,
        Route::ResetPassword,
        Route::Home,
        Route::Profile,
        Route::Settings,
        Route::CreatePost,
        Route::MyPosts,
        Route::Favorites,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Route::SignIn => "/signin",
            Route::SignUp => "/signup",
            Route::ResetPassword => "/reset-password",
            Route::Home => "/",
            Route::Profile => "/profile",
            Route::Settings => "/settings",
            Route::CreatePost => "/create-post",
            Route::MyPosts => "/my-posts",
            Route::Favorites => "/favorites",
        }
    }

    /// Unknown paths land on Home.
    pub fn from_path(path: &str) -> Route {
        let trimmed = path.split(['?', '#']).next().unwrap_or("");
        let trimmed = match trimmed.trim_end_matches('/') {
            "" => "/",
            p => p,
        };
        Self::ALL
            .into_iter()
            .find(|r| r.path() == trimmed)
            .unwrap_or(Route::Home)
    }

    pub fn requires_session(&self) -> bool {
        matches!(
            self,
            Route::Profile | Route::Settings | Route::CreatePost | Route::MyPosts | Route::Favorites
        )
    }

    pub fn is_auth_screen(&self) -> bool {
        matches!(self, Route::SignIn | Route::SignUp | Route::ResetPassword)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// The stored session has not been checked yet.
    Loading,
    SignedOut,
    SignedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allow,
    ShowLoading,
    Redirect(Route),
}

/// Decide what to show for `route` given the session state.
pub fn gate(route: Route, auth: AuthState) -> Gate {
    match (auth, route) {
        (AuthState::SignedIn, r) if r.is_auth_screen() => Gate::Redirect(Route::Home),
        (AuthState::Loading, r) if r.requires_session() => Gate::ShowLoading,
        (AuthState::SignedOut, r) if r.requires_session() => Gate::Redirect(Route::SignIn),
        _ => Gate::Allow,
    }
}

/// Follow redirects until a route is allowed or loading must be shown.
pub fn resolve(route: Route, auth: AuthState) -> Gate {
    let mut current = route;
    for _ in 0..Route::ALL.len() {
        match gate(current, auth) {
            Gate::Redirect(next) => current = next,
            other if current == route => return other,
            Gate::ShowLoading => return Gate::ShowLoading,
            Gate::Allow => return Gate::Redirect(current),
        }
    }
    Gate::Redirect(Route::Home)
}
